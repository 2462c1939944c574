//! Parameter schemas for the calls the harness knows how to build.
//!
//! Targets without a declared schema pass through untouched; the node is the
//! final authority on those payloads.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::errors::{HarnessError, HarnessResult};

pub const REGISTRY_MODULE: &str = "Registry";
pub const SUDO_MODULE: &str = "Sudo";

pub const ACCEPT_TERMS: &str = "accept_terms";
pub const CREATE_RECORD: &str = "create_record";
pub const UPDATE_RECORD: &str = "update_record";
pub const DELETE_RECORD: &str = "delete_record";
pub const SUDO_CALL: &str = "sudo";

pub const RECORDS_ITEM: &str = "Records";

pub const RECORD_STORED_EVENT: &str = "RecordStored";
pub const RECORD_UPDATED_EVENT: &str = "RecordUpdated";
pub const RECORD_DELETED_EVENT: &str = "RecordDeleted";
pub const TERMS_ACCEPTED_EVENT: &str = "TermsAccepted";
pub const SUDID_EVENT: &str = "Sudid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Unsigned,
    Call,
}

impl ParamKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Unsigned => value.is_u64(),
            ParamKind::Call => value
                .as_object()
                .map(|call| {
                    call.get("module").map_or(false, Value::is_string)
                        && call.get("function").map_or(false, Value::is_string)
                })
                .unwrap_or(false),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ParamKind::String => "a string",
            ParamKind::Unsigned => "an unsigned integer",
            ParamKind::Call => "a call object with module and function",
        }
    }
}

/// Required fields of one call target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpec {
    pub fields: Vec<(&'static str, ParamKind)>,
}

#[derive(Debug, Clone)]
pub struct CallSchema {
    calls: HashMap<(String, String), CallSpec>,
}

impl Default for CallSchema {
    fn default() -> Self {
        let mut schema = Self::empty();
        schema.declare(
            REGISTRY_MODULE,
            ACCEPT_TERMS,
            &[
                ("document_link", ParamKind::String),
                ("document_hash", ParamKind::String),
            ],
        );
        schema.declare(REGISTRY_MODULE, CREATE_RECORD, &[("ip", ParamKind::String)]);
        schema.declare(REGISTRY_MODULE, UPDATE_RECORD, &[("ip", ParamKind::String)]);
        schema.declare(
            REGISTRY_MODULE,
            DELETE_RECORD,
            &[("record_id", ParamKind::Unsigned)],
        );
        schema.declare(SUDO_MODULE, SUDO_CALL, &[("call", ParamKind::Call)]);
        schema
    }
}

impl CallSchema {
    pub fn empty() -> Self {
        Self {
            calls: HashMap::new(),
        }
    }

    pub fn declare(
        &mut self,
        module: &str,
        function: &str,
        fields: &[(&'static str, ParamKind)],
    ) {
        self.calls.insert(
            (module.to_string(), function.to_string()),
            CallSpec {
                fields: fields.to_vec(),
            },
        );
    }

    pub fn lookup(&self, module: &str, function: &str) -> Option<&CallSpec> {
        self.calls.get(&(module.to_string(), function.to_string()))
    }

    /// Checks `params` against the declared fields of `module.function`.
    /// Extra fields are allowed.
    pub fn validate(&self, module: &str, function: &str, params: &Value) -> HarnessResult<()> {
        let invalid = |reason: String| HarnessError::InvalidParams {
            module: module.to_string(),
            function: function.to_string(),
            reason,
        };

        if module.trim().is_empty() || function.trim().is_empty() {
            return Err(invalid("module and function must be named".into()));
        }

        let Some(spec) = self.lookup(module, function) else {
            return Ok(());
        };

        let object = params
            .as_object()
            .ok_or_else(|| invalid(format!("expected an object, got {params}")))?;
        for (field, kind) in &spec.fields {
            match object.get(*field) {
                None => return Err(invalid(format!("missing field `{field}`"))),
                Some(value) if !kind.accepts(value) => {
                    return Err(invalid(format!(
                        "field `{field}` must be {}, got {value}",
                        kind.describe()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Builds a params object from `(name, value)` pairs.
pub fn params<I, K>(fields: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Object(
        fields
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect::<Map<String, Value>>(),
    )
}
