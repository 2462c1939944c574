//! Signs calls with development identities, submits them and checks the
//! events they produce.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::calls::{
    self, CallSchema, ACCEPT_TERMS, CREATE_RECORD, DELETE_RECORD, RECORDS_ITEM,
    RECORD_DELETED_EVENT, RECORD_STORED_EVENT, RECORD_UPDATED_EVENT, REGISTRY_MODULE,
    SUDID_EVENT, SUDO_CALL, SUDO_MODULE, UPDATE_RECORD,
};
use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::events::{first_unmatched, Event, ExpectedEvent};
use crate::identity::{signature_to_hex, IdentityProvider};
use crate::rpc::{
    Call, CompletionMode, JsonRpcSessionFactory, NodeEndpoint, RpcSession, SessionFactory,
    SignedCall,
};

/// Signer alias that wraps the call in the privileged envelope.
pub const PRIVILEGED_ALIAS: &str = "sudo";
/// Identity that signs privileged envelopes.
pub const PRIVILEGED_SIGNER: &str = "alice";
pub const DEFAULT_SIGNER: &str = "alice";

const TERMS_DOCUMENT_LINK: &str = "garbage";
const TERMS_DOCUMENT_HASH: &str = "garbage";

/// One call to submit, with the events it must produce.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub module: String,
    pub function: String,
    pub params: Value,
    pub signer: String,
    pub expected: Vec<ExpectedEvent>,
    pub mode: Option<CompletionMode>,
}

impl Invocation {
    pub fn new(module: impl Into<String>, function: impl Into<String>, params: Value) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            params,
            signer: DEFAULT_SIGNER.to_string(),
            expected: Vec::new(),
            mode: None,
        }
    }

    pub fn signed_by(mut self, signer: impl Into<String>) -> Self {
        self.signer = signer.into();
        self
    }

    pub fn expect(mut self, pattern: ExpectedEvent) -> Self {
        self.expected.push(pattern);
        self
    }

    pub fn expect_all(mut self, patterns: impl IntoIterator<Item = ExpectedEvent>) -> Self {
        self.expected.extend(patterns);
        self
    }

    pub fn with_mode(mut self, mode: CompletionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    fn is_privileged(&self) -> bool {
        self.signer.trim().eq_ignore_ascii_case(PRIVILEGED_ALIAS)
    }
}

pub struct SignedCallClient {
    identities: Arc<IdentityProvider>,
    sessions: Arc<dyn SessionFactory>,
    schema: CallSchema,
    completion_mode: CompletionMode,
    signing_slots: Vec<String>,
}

impl SignedCallClient {
    pub fn new(identities: Arc<IdentityProvider>, sessions: Arc<dyn SessionFactory>) -> Self {
        let defaults = HarnessConfig::default();
        Self {
            identities,
            sessions,
            schema: CallSchema::default(),
            completion_mode: defaults.completion_mode,
            signing_slots: defaults.signing_slots,
        }
    }

    /// Client speaking JSON-RPC with the configured timeout, completion mode
    /// and signing slots.
    pub fn from_config(config: &HarnessConfig, identities: Arc<IdentityProvider>) -> Self {
        Self::new(
            identities,
            Arc::new(JsonRpcSessionFactory::new(config.rpc_timeout())),
        )
        .with_completion_mode(config.completion_mode)
        .with_signing_slots(config.signing_slots.clone())
    }

    pub fn with_completion_mode(mut self, mode: CompletionMode) -> Self {
        self.completion_mode = mode;
        self
    }

    pub fn with_schema(mut self, schema: CallSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_signing_slots(mut self, slots: Vec<String>) -> Self {
        self.signing_slots = slots;
        self
    }

    pub fn identities(&self) -> &Arc<IdentityProvider> {
        &self.identities
    }

    pub fn sessions(&self) -> &Arc<dyn SessionFactory> {
        &self.sessions
    }

    /// Signs and submits `invocation`, then checks that every expected
    /// pattern matched at least one produced event. Signer and parameters are
    /// validated before any connection is opened.
    pub async fn invoke(
        &self,
        endpoint: &NodeEndpoint,
        invocation: Invocation,
    ) -> HarnessResult<Vec<Event>> {
        let privileged = invocation.is_privileged();
        let signer = if privileged {
            PRIVILEGED_SIGNER
        } else {
            invocation.signer.as_str()
        };
        let identity = self.identities.resolve(signer)?;
        self.schema
            .validate(&invocation.module, &invocation.function, &invocation.params)?;
        let mode = invocation.mode.unwrap_or(self.completion_mode);

        let session = self.sessions.connect(endpoint).await?;
        let mut call = session.compose_call(
            &invocation.module,
            &invocation.function,
            invocation.params,
        )?;
        if privileged {
            call = wrap_privileged(session.as_ref(), call)?;
        }

        let payload = call.encode()?;
        let signature = identity.sign(&payload);
        info!(
            target = "chain_harness::client",
            node = %endpoint.label,
            module = %call.module,
            function = %call.function,
            signer = identity.name(),
            ?mode,
            "sending signed call"
        );
        let signed = SignedCall {
            call,
            signer: identity.address().to_string(),
            public_key: identity.public_key_hex(),
            signature: signature_to_hex(&signature),
        };

        let result = session.submit(signed, mode).await?;
        if !result.success {
            let message = result
                .error
                .unwrap_or_else(|| "node rejected the call without a reason".to_string());
            warn!(
                target = "chain_harness::client",
                node = %endpoint.label,
                module = %invocation.module,
                function = %invocation.function,
                "call rejected: {message}"
            );
            return Err(HarnessError::CallRejected(message));
        }

        let events = result.events;
        info!(
            target = "chain_harness::client",
            node = %endpoint.label,
            events = ?events,
            "call produced events"
        );

        if privileged {
            check_privileged_outcome(&events)?;
        }

        if let Some(pattern) = first_unmatched(&events, &invocation.expected) {
            return Err(HarnessError::ExpectedEventNotFound {
                pattern: pattern.clone(),
                observed: events,
            });
        }
        for pattern in &invocation.expected {
            debug!(
                target = "chain_harness::client",
                pattern = %pattern,
                "found expected event"
            );
        }

        Ok(events)
    }

    /// Point lookup of a storage item. No signing involved.
    pub async fn query(
        &self,
        endpoint: &NodeEndpoint,
        module: &str,
        item: &str,
        keys: &[Value],
    ) -> HarnessResult<Option<Value>> {
        let session = self.sessions.connect(endpoint).await?;
        let value = session.query_storage(module, item, keys).await?;
        debug!(
            target = "chain_harness::client",
            node = %endpoint.label,
            module,
            item,
            found = value.is_some(),
            "storage query"
        );
        Ok(value)
    }

    /// Registers the identity's key in every signing slot of the node's
    /// keystore, optionally accepting the terms and creating its record.
    pub async fn setup_identity(
        &self,
        endpoint: &NodeEndpoint,
        name: &str,
        create_record: bool,
    ) -> HarnessResult<()> {
        let identity = self.identities.resolve(name)?;
        {
            let session = self.sessions.connect(endpoint).await?;
            let public_key = identity.public_key_hex();
            for slot in &self.signing_slots {
                session
                    .insert_key(slot, identity.seed(), &public_key)
                    .await?;
                debug!(
                    target = "chain_harness::client",
                    node = %endpoint.label,
                    identity = identity.name(),
                    slot = %slot,
                    "inserted key"
                );
            }
        }

        if create_record {
            self.accept_terms(endpoint, name).await?;
            self.create_record(endpoint, "::1", name).await?;
        }
        Ok(())
    }

    pub async fn accept_terms(
        &self,
        endpoint: &NodeEndpoint,
        signer: &str,
    ) -> HarnessResult<Vec<Event>> {
        let params = calls::params([
            ("document_link", json!(TERMS_DOCUMENT_LINK)),
            ("document_hash", json!(TERMS_DOCUMENT_HASH)),
        ]);
        self.invoke(
            endpoint,
            Invocation::new(REGISTRY_MODULE, ACCEPT_TERMS, params).signed_by(signer),
        )
        .await
    }

    pub async fn create_record(
        &self,
        endpoint: &NodeEndpoint,
        ip: &str,
        signer: &str,
    ) -> HarnessResult<Vec<Event>> {
        self.invoke(
            endpoint,
            Invocation::new(REGISTRY_MODULE, CREATE_RECORD, json!({ "ip": ip }))
                .signed_by(signer)
                .expect(ExpectedEvent::event(REGISTRY_MODULE, RECORD_STORED_EVENT)),
        )
        .await
    }

    pub async fn update_record(
        &self,
        endpoint: &NodeEndpoint,
        ip: &str,
        signer: &str,
    ) -> HarnessResult<Vec<Event>> {
        self.invoke(
            endpoint,
            Invocation::new(REGISTRY_MODULE, UPDATE_RECORD, json!({ "ip": ip }))
                .signed_by(signer)
                .expect(ExpectedEvent::event(REGISTRY_MODULE, RECORD_UPDATED_EVENT)),
        )
        .await
    }

    pub async fn delete_record(
        &self,
        endpoint: &NodeEndpoint,
        record_id: u64,
        signer: &str,
    ) -> HarnessResult<Vec<Event>> {
        self.invoke(
            endpoint,
            Invocation::new(
                REGISTRY_MODULE,
                DELETE_RECORD,
                json!({ "record_id": record_id }),
            )
            .signed_by(signer)
            .expect(ExpectedEvent::event(REGISTRY_MODULE, RECORD_DELETED_EVENT)),
        )
        .await
    }

    pub async fn get_record(
        &self,
        endpoint: &NodeEndpoint,
        record_id: u64,
    ) -> HarnessResult<Option<Value>> {
        self.query(endpoint, REGISTRY_MODULE, RECORDS_ITEM, &[json!(record_id)])
            .await
    }

    pub async fn block_number(&self, endpoint: &NodeEndpoint) -> HarnessResult<u64> {
        let session = self.sessions.connect(endpoint).await?;
        session.block_height().await
    }
}

fn wrap_privileged(session: &dyn RpcSession, inner: Call) -> HarnessResult<Call> {
    let inner = serde_json::to_value(&inner)
        .map_err(|err| HarnessError::Rpc(format!("failed to encode inner call: {err}")))?;
    session.compose_call(SUDO_MODULE, SUDO_CALL, json!({ "call": inner }))
}

/// Fails when the privileged marker event reports an `Err` dispatch result.
fn check_privileged_outcome(events: &[Event]) -> HarnessResult<()> {
    let Some(marker) = events
        .iter()
        .find(|event| event.is(SUDO_MODULE, SUDID_EVENT))
    else {
        warn!(
            target = "chain_harness::client",
            "privileged call produced no {SUDO_MODULE}.{SUDID_EVENT} event"
        );
        return Ok(());
    };

    match marker.attributes.get("sudo_result") {
        Some(Value::Object(result)) => match result.get("Err") {
            Some(err) => Err(HarnessError::PrivilegedCallFailed(err.clone())),
            None => Ok(()),
        },
        Some(Value::String(result)) if result.starts_with("Err") => {
            Err(HarnessError::PrivilegedCallFailed(Value::String(result.clone())))
        }
        _ => Ok(()),
    }
}
