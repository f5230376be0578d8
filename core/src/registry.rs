//! Process-wide translator registry.
//!
//! Translators register under a name and are instantiated per schema from a
//! ticket. Construction is single-threaded; `init` installs the built-in
//! translators and `teardown` clears everything.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::dictionary::Dict;
use crate::error::Result;
use crate::script_translator::ScriptTranslator;
use crate::table_translator::TableTranslator;
use crate::translation::{Segment, Translation};
use crate::user_dict::UserDict;
use crate::Config;

/// Everything a translator needs to come to life.
pub struct Ticket {
    pub dict: Arc<Dict>,
    pub user_dict: Option<UserDict>,
    pub config: Config,
}

/// The capability every translator exposes to the engine loop.
pub trait Translator {
    fn query(&self, input: &str, segment: &Segment) -> Option<Box<dyn Translation>>;
}

impl Translator for ScriptTranslator {
    fn query(&self, input: &str, segment: &Segment) -> Option<Box<dyn Translation>> {
        ScriptTranslator::query(self, input, segment)
    }
}

impl Translator for TableTranslator {
    fn query(&self, input: &str, segment: &Segment) -> Option<Box<dyn Translation>> {
        TableTranslator::query(self, input, segment)
    }
}

pub type TranslatorFactory = fn(&Ticket) -> Result<Box<dyn Translator>>;

static REGISTRY: Lazy<RwLock<HashMap<String, TranslatorFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Install the built-in translators.
pub fn init() {
    register("script_translator", |ticket| {
        Ok(Box::new(ScriptTranslator::new(
            ticket.dict.clone(),
            ticket.user_dict.clone(),
            &ticket.config,
        )?))
    });
    register("table_translator", |ticket| {
        Ok(Box::new(TableTranslator::new(
            ticket.dict.clone(),
            ticket.user_dict.clone(),
            &ticket.config,
        )?))
    });
}

pub fn register(name: &str, factory: TranslatorFactory) {
    REGISTRY
        .write()
        .expect("registry lock")
        .insert(name.to_string(), factory);
}

/// Instantiate a registered translator; `None` for unknown names.
pub fn create(name: &str, ticket: &Ticket) -> Option<Result<Box<dyn Translator>>> {
    let factory = *REGISTRY.read().expect("registry lock").get(name)?;
    Some(factory(ticket))
}

pub fn registered() -> Vec<String> {
    let mut names: Vec<String> = REGISTRY
        .read()
        .expect("registry lock")
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}

pub fn teardown() {
    REGISTRY.write().expect("registry lock").clear();
}
