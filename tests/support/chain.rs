//! In-memory chain standing in for a running network. Every endpoint that
//! connects to the same `MockChain` observes the same state, the way nodes of
//! one network converge on one chain.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chain_harness::calls::{
    ACCEPT_TERMS, CREATE_RECORD, DELETE_RECORD, RECORDS_ITEM, RECORD_DELETED_EVENT,
    RECORD_STORED_EVENT, RECORD_UPDATED_EVENT, REGISTRY_MODULE, SUDID_EVENT, SUDO_CALL,
    SUDO_MODULE, TERMS_ACCEPTED_EVENT, UPDATE_RECORD,
};
use chain_harness::errors::HarnessResult;
use chain_harness::identity::IdentityProvider;
use chain_harness::rpc::{
    Call, CompletionMode, NodeEndpoint, RpcSession, SessionFactory, SignedCall, SubmissionResult,
};
use chain_harness::Event;
use parking_lot::Mutex;
use schnorrkel::{PublicKey, Signature};
use serde_json::{json, Value};

const SIGNING_CONTEXT: &[u8] = b"substrate";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedKey {
    pub node: String,
    pub key_type: String,
    pub suri: String,
    pub public_key: String,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub node: String,
    pub call: SignedCall,
    pub mode: CompletionMode,
}

#[derive(Default)]
struct ChainState {
    height: u64,
    next_record_id: u64,
    records: BTreeMap<u64, Value>,
    record_by_account: HashMap<String, u64>,
    accepted_terms: HashSet<String>,
    keystore: Vec<InsertedKey>,
    submissions: Vec<Submission>,
}

enum Origin {
    Signed(String),
    Root,
}

#[derive(Default)]
struct Inner {
    state: Mutex<ChainState>,
    connections: AtomicUsize,
    root_account: String,
}

#[derive(Clone)]
pub struct MockChain {
    inner: Arc<Inner>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        let root_account = IdentityProvider::new()
            .resolve("alice")
            .expect("alice is predefined")
            .address()
            .to_string();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ChainState {
                    next_record_id: 1,
                    ..ChainState::default()
                }),
                connections: AtomicUsize::new(0),
                root_account,
            }),
        }
    }

    pub fn factory(&self) -> Arc<dyn SessionFactory> {
        Arc::new(self.clone())
    }

    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    pub fn height(&self) -> u64 {
        self.inner.state.lock().height
    }

    pub fn keystore(&self) -> Vec<InsertedKey> {
        self.inner.state.lock().keystore.clone()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.inner.state.lock().submissions.clone()
    }
}

#[async_trait]
impl SessionFactory for MockChain {
    async fn connect(&self, endpoint: &NodeEndpoint) -> HarnessResult<Box<dyn RpcSession>> {
        self.inner.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            node: endpoint.label.clone(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockSession {
    node: String,
    inner: Arc<Inner>,
}

#[async_trait]
impl RpcSession for MockSession {
    async fn insert_key(
        &self,
        key_type: &str,
        suri: &str,
        public_key_hex: &str,
    ) -> HarnessResult<()> {
        self.inner.state.lock().keystore.push(InsertedKey {
            node: self.node.clone(),
            key_type: key_type.to_string(),
            suri: suri.to_string(),
            public_key: public_key_hex.to_string(),
        });
        Ok(())
    }

    async fn submit(
        &self,
        call: SignedCall,
        mode: CompletionMode,
    ) -> HarnessResult<SubmissionResult> {
        let mut state = self.inner.state.lock();
        state.submissions.push(Submission {
            node: self.node.clone(),
            call: call.clone(),
            mode,
        });

        if let Err(reason) = verify_signature(&call) {
            return Ok(SubmissionResult::rejected(reason));
        }

        let origin = Origin::Signed(call.signer.clone());
        match dispatch(&mut state, &self.inner.root_account, origin, &call.call) {
            Ok(mut events) => {
                state.height += 1;
                events.push(Event::new("System", "ExtrinsicSuccess"));
                Ok(SubmissionResult::succeeded(events))
            }
            Err(reason) => Ok(SubmissionResult::rejected(reason)),
        }
    }

    async fn query_storage(
        &self,
        module: &str,
        item: &str,
        keys: &[Value],
    ) -> HarnessResult<Option<Value>> {
        let state = self.inner.state.lock();
        Ok(match (module, item) {
            (REGISTRY_MODULE, RECORDS_ITEM) => keys
                .first()
                .and_then(Value::as_u64)
                .and_then(|id| state.records.get(&id).cloned()),
            ("System", "Number") => Some(json!(state.height)),
            _ => None,
        })
    }

    async fn block_height(&self) -> HarnessResult<u64> {
        Ok(self.inner.state.lock().height)
    }
}

fn verify_signature(call: &SignedCall) -> Result<(), String> {
    let public = hex::decode(&call.public_key)
        .ok()
        .and_then(|bytes| PublicKey::from_bytes(&bytes).ok())
        .ok_or("malformed public key")?;
    let signature = hex::decode(&call.signature)
        .ok()
        .and_then(|bytes| Signature::from_bytes(&bytes).ok())
        .ok_or("malformed signature")?;
    let payload = call.call.encode().map_err(|err| err.to_string())?;
    public
        .verify_simple(SIGNING_CONTEXT, &payload, &signature)
        .map_err(|_| "bad signature".to_string())
}

fn dispatch(
    state: &mut ChainState,
    root_account: &str,
    origin: Origin,
    call: &Call,
) -> Result<Vec<Event>, String> {
    match (call.module.as_str(), call.function.as_str()) {
        (SUDO_MODULE, SUDO_CALL) => {
            let Origin::Signed(account) = origin else {
                return Err("BadOrigin".into());
            };
            if account != root_account {
                return Err("Sudo.RequireSudo".into());
            }
            let inner: Call = serde_json::from_value(call.params["call"].clone())
                .map_err(|err| format!("malformed inner call: {err}"))?;
            let (mut events, sudo_result) = match dispatch(state, root_account, Origin::Root, &inner)
            {
                Ok(events) => (events, json!({ "Ok": null })),
                Err(reason) => (Vec::new(), json!({ "Err": reason })),
            };
            events.push(
                Event::new(SUDO_MODULE, SUDID_EVENT).with_attribute("sudo_result", sudo_result),
            );
            Ok(events)
        }
        ("System", "remark") => Ok(vec![Event::new("System", "Remarked")]),
        (REGISTRY_MODULE, function) => {
            let Origin::Signed(account) = origin else {
                return Err("BadOrigin".into());
            };
            registry(state, &account, function, &call.params)
        }
        (module, function) => Err(format!("unknown call {module}.{function}")),
    }
}

fn registry(
    state: &mut ChainState,
    account: &str,
    function: &str,
    params: &Value,
) -> Result<Vec<Event>, String> {
    match function {
        ACCEPT_TERMS => {
            state.accepted_terms.insert(account.to_string());
            Ok(vec![Event::new(REGISTRY_MODULE, TERMS_ACCEPTED_EVENT)
                .with_attribute("account_id", account)])
        }
        CREATE_RECORD => {
            if !state.accepted_terms.contains(account) {
                return Err("Registry.TermsNotAccepted".into());
            }
            if state.record_by_account.contains_key(account) {
                return Err("Registry.RecordExists".into());
            }
            let id = state.next_record_id;
            state.next_record_id += 1;
            let record = json!({ "id": id, "account_id": account, "ip": params["ip"] });
            state.records.insert(id, record.clone());
            state.record_by_account.insert(account.to_string(), id);
            Ok(vec![record_event(RECORD_STORED_EVENT, record)])
        }
        UPDATE_RECORD => {
            let id = *state
                .record_by_account
                .get(account)
                .ok_or("Registry.RecordNotExists")?;
            let record = state
                .records
                .get_mut(&id)
                .ok_or("Registry.RecordNotExists")?;
            record["ip"] = params["ip"].clone();
            Ok(vec![record_event(RECORD_UPDATED_EVENT, record.clone())])
        }
        DELETE_RECORD => {
            let id = params["record_id"]
                .as_u64()
                .ok_or("Registry.RecordNotExists")?;
            if state.record_by_account.get(account) != Some(&id) {
                return Err("Registry.UnauthorizedToDeleteRecord".into());
            }
            state.record_by_account.remove(account);
            state.records.remove(&id);
            Ok(vec![Event::new(REGISTRY_MODULE, RECORD_DELETED_EVENT)
                .with_attribute("record_id", id)])
        }
        other => Err(format!("unknown call {REGISTRY_MODULE}.{other}")),
    }
}

fn record_event(event_id: &str, record: Value) -> Event {
    let mut event = Event::new(REGISTRY_MODULE, event_id);
    if let Value::Object(attributes) = record {
        event.attributes = attributes;
    }
    event
}
