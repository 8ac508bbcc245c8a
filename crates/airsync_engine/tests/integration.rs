//! Integration tests for the Sync command over an in-memory backend and store.

use airsync_codec::tags::{contacts, email};
use airsync_codec::EventReader;
use airsync_engine::{
    BackendError, Cancellation, EngineConfig, EngineError, MemoryBackend, RequestContext,
    SyncHandler,
};
use airsync_protocol::{
    ApplicationData, ChangeKind, CollectionClass, CollectionOptions, CollectionRequest, Command,
    FilterType, ProtocolVersion, SupportedFields, SyncKey, SyncRequest, SyncResponse, SyncStatus,
};
use airsync_state::{MemoryStateStore, StateStore};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const DEVICE: &str = "dev1";
const V14: ProtocolVersion = ProtocolVersion::V14_1;

struct Fixture {
    handler: SyncHandler<MemoryStateStore, MemoryBackend>,
    backend: Arc<MemoryBackend>,
    store: Arc<MemoryStateStore>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let backend = Arc::new(MemoryBackend::new());
        backend.add_folder("inbox", CollectionClass::Email);
        backend.add_folder("contacts", CollectionClass::Contacts);
        let store = Arc::new(MemoryStateStore::new());
        store.set_hierarchy(DEVICE, "1").unwrap();
        let handler = SyncHandler::new(config, Arc::clone(&store), Arc::clone(&backend));
        Self {
            handler,
            backend,
            store,
        }
    }

    fn seed(&self, folder: &str, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| self.backend.insert(folder, mail(&format!("{folder} {i}"))).unwrap())
            .collect()
    }

    async fn sync_as(
        &self,
        ctx: &RequestContext,
        request: &SyncRequest,
    ) -> Result<SyncResponse, EngineError> {
        let mut reader = request.to_reader(ctx.version).unwrap();
        self.handler.handle(ctx, &mut reader).await
    }

    async fn sync_version(&self, version: ProtocolVersion, request: &SyncRequest) -> SyncResponse {
        self.sync_as(&RequestContext::new(DEVICE, version), request)
            .await
            .unwrap()
    }

    async fn sync(&self, request: &SyncRequest) -> SyncResponse {
        self.sync_version(V14, request).await
    }

    async fn sync_empty(&self, version: ProtocolVersion) -> SyncResponse {
        let ctx = RequestContext::new(DEVICE, version);
        self.handler
            .handle(&ctx, &mut EventReader::new(Vec::new()))
            .await
            .unwrap()
    }

    /// Pairs `folder` and brings its key past the first exchange.
    async fn settle(&self, folder: &str) -> SyncKey {
        let first = self.sync(&one(collection(folder, SyncKey::Initial))).await;
        let key = key_of(&first, folder);
        let second = self.sync(&one(collection(folder, &key))).await;
        key_of(&second, folder)
    }
}

fn mail(subject: &str) -> ApplicationData {
    ApplicationData::new(CollectionClass::Email).with_text(email::SUBJECT, subject)
}

fn collection(id: &str, key: impl ToString) -> CollectionRequest {
    CollectionRequest::new(id, key.to_string())
}

fn one(collection: CollectionRequest) -> SyncRequest {
    SyncRequest::new().with_collection(collection)
}

fn key_of(response: &SyncResponse, id: &str) -> SyncKey {
    response.collection(id).unwrap().sync_key.clone()
}

fn status_of(response: &SyncResponse, id: &str) -> SyncStatus {
    response.collection(id).unwrap().status
}

#[tokio::test]
async fn initial_key_returns_full_snapshot() {
    let fx = Fixture::new();
    let ids = fx.seed("inbox", 3);

    let response = fx.sync(&one(collection("inbox", "0"))).await;
    assert_eq!(response.status, SyncStatus::Success);
    let inbox = response.collection("inbox").unwrap();
    assert_eq!(inbox.status, SyncStatus::Success);
    assert_eq!(inbox.sync_key.counter(), 1);
    assert!(inbox.commands.iter().all(|c| c.kind == ChangeKind::Add));
    let sent: Vec<_> = inbox.commands.iter().map(|c| c.server_id.clone()).collect();
    assert_eq!(sent, ids);
    assert!(!inbox.more_available);
}

#[tokio::test]
async fn follow_up_reports_new_items() {
    let fx = Fixture::new();
    fx.seed("inbox", 2);
    let first = fx.sync(&one(collection("inbox", "0"))).await;
    let k1 = key_of(&first, "inbox");

    let added = fx.backend.insert("inbox", mail("late")).unwrap();
    let second = fx.sync(&one(collection("inbox", &k1))).await;
    let inbox = second.collection("inbox").unwrap();
    assert_eq!(inbox.commands.len(), 1);
    assert_eq!(inbox.commands[0].server_id, added);
    assert_eq!(inbox.commands[0].kind, ChangeKind::Add);
    assert!(inbox.sync_key.follows(&k1));
}

#[tokio::test]
async fn window_pages_until_drained() {
    let fx = Fixture::new();
    fx.seed("inbox", 20);

    let mut key = SyncKey::Initial;
    let mut seen = BTreeSet::new();
    let mut pages = 0;
    loop {
        let response = fx
            .sync(&one(collection("inbox", &key).with_window_size(5)))
            .await;
        let inbox = response.collection("inbox").unwrap();
        assert!(inbox.commands.len() <= 5);
        assert!(inbox.sync_key.follows(&key));
        seen.extend(inbox.commands.iter().map(|c| c.server_id.clone()));
        key = inbox.sync_key.clone();
        pages += 1;
        if !inbox.more_available {
            break;
        }
        assert_eq!(inbox.commands.len(), 5);
    }
    assert_eq!(pages, 4);
    assert_eq!(seen.len(), 20);
}

#[tokio::test]
async fn removing_a_missing_item_reports_it() {
    let fx = Fixture::new();
    let key = fx.settle("inbox").await;

    let request = one(collection("inbox", &key).with_command(Command::Remove {
        server_id: "inbox:999".into(),
        instance_id: None,
    }));
    let response = fx.sync(&request).await;
    let inbox = response.collection("inbox").unwrap();
    assert_eq!(inbox.status, SyncStatus::Success);
    assert_eq!(inbox.replies.missing, vec!["inbox:999".to_string()]);
    assert!(inbox.sync_key.follows(&key));
}

#[tokio::test]
async fn heartbeat_over_limit_is_rejected() {
    let fx = Fixture::new();
    let request = one(collection("inbox", "0")).with_heartbeat(4000);
    let response = fx.sync(&request).await;
    assert_eq!(response.status, SyncStatus::InvalidHeartbeat);
    assert_eq!(response.limit, Some(3540));
    assert!(response.collections.is_empty());
}

#[tokio::test]
async fn wait_over_limit_is_rejected() {
    let fx = Fixture::new();
    let response = fx.sync(&one(collection("inbox", "0")).with_wait(60)).await;
    assert_eq!(response.status, SyncStatus::InvalidHeartbeat);
    assert_eq!(response.limit, Some(59));
}

#[tokio::test]
async fn heartbeat_with_wait_is_protocol_error() {
    let fx = Fixture::new();
    let request = one(collection("inbox", "0"))
        .with_heartbeat(300)
        .with_wait(5);
    let response = fx.sync(&request).await;
    assert_eq!(response.status, SyncStatus::ProtocolError);
    assert!(fx.store.load_cache(DEVICE).unwrap().collections.is_empty());
}

#[tokio::test]
async fn reused_key_is_key_mismatch() {
    let fx = Fixture::new();
    fx.seed("inbox", 1);
    let first = fx.sync(&one(collection("inbox", "0"))).await;
    let k1 = key_of(&first, "inbox");
    fx.sync(&one(collection("inbox", &k1))).await;

    let replay = fx.sync(&one(collection("inbox", &k1))).await;
    assert_eq!(replay.status, SyncStatus::Success);
    assert_eq!(status_of(&replay, "inbox"), SyncStatus::KeyMismatch);
}

#[tokio::test]
async fn unchanged_request_is_idempotent() {
    let fx = Fixture::new();
    fx.seed("inbox", 2);
    let key = fx.settle("inbox").await;
    assert_eq!(key.counter(), 2);

    let request = one(collection("inbox", &key));
    let first = fx.sync(&request).await;
    let second = fx.sync(&request).await;
    assert_eq!(first, second);
    assert_eq!(key_of(&first, "inbox"), key);
    assert!(first.collection("inbox").unwrap().commands.is_empty());
}

#[tokio::test]
async fn global_window_spans_collections() {
    let fx = Fixture::new();
    fx.seed("inbox", 5);
    fx.seed("contacts", 5);

    let request = SyncRequest::new()
        .with_window_size(8)
        .with_collection(collection("inbox", "0"))
        .with_collection(collection("contacts", "0"));
    let response = fx.sync(&request).await;
    let inbox = response.collection("inbox").unwrap();
    let contacts = response.collection("contacts").unwrap();
    assert_eq!(inbox.commands.len(), 5);
    assert!(contacts.commands.is_empty());
    assert!(contacts.more_available);
    assert_eq!(contacts.status, SyncStatus::Success);

    let next = SyncRequest::new()
        .with_collection(collection("inbox", &inbox.sync_key))
        .with_collection(collection("contacts", &contacts.sync_key));
    let response = fx.sync(&next).await;
    assert_eq!(response.collection("contacts").unwrap().commands.len(), 5);
}

#[tokio::test]
async fn operator_window_overrides_request() {
    let fx = Fixture::with_config(EngineConfig::default().with_max_request_window_size(3));
    fx.seed("inbox", 5);
    let request = one(collection("inbox", "0")).with_window_size(100);
    let response = fx.sync(&request).await;
    let inbox = response.collection("inbox").unwrap();
    assert_eq!(inbox.commands.len(), 3);
    assert!(inbox.more_available);
}

#[tokio::test]
async fn out_of_range_window_is_clamped() {
    let fx = Fixture::new();
    fx.seed("inbox", 3);
    let response = fx
        .sync(&one(collection("inbox", "0").with_window_size(0)))
        .await;
    assert_eq!(response.collection("inbox").unwrap().commands.len(), 3);
    let cache = fx.store.load_cache(DEVICE).unwrap();
    assert_eq!(cache.collection("inbox").unwrap().window_size, Some(512));
}

#[tokio::test]
async fn empty_request_needs_looping_version() {
    let fx = Fixture::new();
    fx.sync(&one(collection("inbox", "0"))).await;
    let response = fx.sync_empty(ProtocolVersion::V12_0).await;
    assert_eq!(response.status, SyncStatus::RequestIncomplete);
}

#[tokio::test]
async fn empty_request_without_cache_is_incomplete() {
    let fx = Fixture::new();
    let response = fx.sync_empty(V14).await;
    assert_eq!(response.status, SyncStatus::RequestIncomplete);
}

#[tokio::test(start_paused = true)]
async fn empty_request_replays_cache_and_times_out() {
    let fx = Fixture::new();
    fx.sync(&one(collection("inbox", "0"))).await;
    let started = Instant::now();

    let response = fx.sync_empty(V14).await;
    assert!(response.is_empty());
    assert!(response.to_events(V14).unwrap().is_empty());
    assert_eq!(started.elapsed(), Duration::from_secs(10));
}

#[tokio::test]
async fn sync_before_folder_sync_is_refused() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_folder("inbox", CollectionClass::Email);
    let store = Arc::new(MemoryStateStore::new());
    let handler = SyncHandler::new(EngineConfig::default(), store, backend);
    let ctx = RequestContext::new(DEVICE, V14);

    let response = handler
        .handle_request(&ctx, Some(one(collection("inbox", "0"))))
        .await
        .unwrap();
    assert_eq!(response.status, SyncStatus::FolderSyncRequired);
}

#[tokio::test]
async fn supported_needs_initial_key() {
    let fx = Fixture::new();
    let key = fx.settle("contacts").await;
    let request = one(
        collection("contacts", &key)
            .with_supported(SupportedFields::Only(vec![contacts::FIRST_NAME])),
    );
    let response = fx.sync(&request).await;
    assert_eq!(response.status, SyncStatus::ProtocolError);
}

#[tokio::test]
async fn add_on_initial_key_is_applied() {
    let fx = Fixture::new();
    fx.seed("inbox", 1);
    let request = one(collection("inbox", "0").with_command(Command::Add {
        client_id: "c1".into(),
        class: None,
        data: mail("from device"),
    }));
    let response = fx.sync(&request).await;
    let inbox = response.collection("inbox").unwrap();
    let reply = &inbox.replies.adds[0];
    assert_eq!(reply.client_id, "c1");
    assert_eq!(reply.status, SyncStatus::Success);
    let server_id = reply.server_id.clone().unwrap();
    assert!(fx.backend.item("inbox", &server_id).is_some());
    assert_eq!(inbox.commands.len(), 1);
    assert_ne!(inbox.commands[0].server_id, server_id);
}

#[tokio::test]
async fn forced_export_holds_changes_for_next_exchange() {
    let fx = Fixture::new();
    fx.seed("inbox", 2);
    let request = one(
        collection("inbox", "0")
            .with_get_changes(false)
            .with_command(Command::Add {
                client_id: "c1".into(),
                class: None,
                data: mail("draft"),
            }),
    );
    let first = fx.sync(&request).await;
    let inbox = first.collection("inbox").unwrap();
    assert!(inbox.commands.is_empty());
    assert_eq!(inbox.sync_key.counter(), 1);

    let second = fx.sync(&one(collection("inbox", &inbox.sync_key))).await;
    assert_eq!(second.collection("inbox").unwrap().commands.len(), 2);
}

#[tokio::test]
async fn unknown_key_skips_import() {
    let fx = Fixture::new();
    let foreign = SyncKey::Initial.next().next();
    let request = one(collection("inbox", &foreign).with_command(Command::Add {
        client_id: "c1".into(),
        class: None,
        data: mail("lost"),
    }));
    let response = fx.sync(&request).await;
    let inbox = response.collection("inbox").unwrap();
    assert_eq!(inbox.status, SyncStatus::KeyMismatch);
    assert!(inbox.replies.is_empty());
    assert!(fx.backend.item_ids("inbox").is_empty());
}

#[tokio::test]
async fn ghosted_fields_survive_modify() {
    let fx = Fixture::new();
    let contact = ApplicationData::new(CollectionClass::Contacts)
        .with_text(contacts::FIRST_NAME, "Ada")
        .with_text(contacts::LAST_NAME, "Lovelace");
    let id = fx.backend.insert("contacts", contact).unwrap();

    let first = fx
        .sync(&one(
            collection("contacts", "0")
                .with_supported(SupportedFields::Only(vec![contacts::FIRST_NAME])),
        ))
        .await;
    let key = key_of(&first, "contacts");

    let change = ApplicationData::new(CollectionClass::Contacts)
        .with_text(contacts::FIRST_NAME, "Augusta");
    let second = fx
        .sync(&one(collection("contacts", &key).with_command(Command::Modify {
            server_id: id.clone(),
            instance_id: None,
            data: change,
        })))
        .await;
    let collection = second.collection("contacts").unwrap();
    assert!(collection.replies.modify_failures.is_empty());
    assert!(collection.commands.is_empty());

    let stored = fx.backend.item("contacts", &id).unwrap();
    assert_eq!(stored.text(contacts::FIRST_NAME), Some("Augusta"));
    assert_eq!(stored.text(contacts::LAST_NAME), Some("Lovelace"));
}

#[tokio::test]
async fn transient_failure_is_per_collection() {
    let fx = Fixture::new();
    fx.seed("inbox", 1);
    fx.backend
        .fail_folder("contacts", BackendError::temporary("directory offline"));
    let request = SyncRequest::new()
        .with_collection(collection("inbox", "0"))
        .with_collection(collection("contacts", "0"));
    let response = fx.sync(&request).await;
    assert_eq!(response.status, SyncStatus::Success);
    assert_eq!(status_of(&response, "inbox"), SyncStatus::Success);
    assert_eq!(status_of(&response, "contacts"), SyncStatus::ServerErrorRetry);
}

#[tokio::test]
async fn lost_authorization_fails_request() {
    let fx = Fixture::new();
    let key = fx.settle("inbox").await;
    fx.backend
        .fail_folder("inbox", BackendError::AuthenticationLost);
    let request = one(collection("inbox", &key).with_command(Command::Add {
        client_id: "c1".into(),
        class: None,
        data: mail("x"),
    }));
    let response = fx.sync(&request).await;
    assert_eq!(response.status, SyncStatus::ServerError);
    assert!(response.collections.is_empty());
}

#[tokio::test(start_paused = true)]
async fn long_poll_returns_on_change() {
    let fx = Fixture::new();
    fx.seed("inbox", 1);
    let key = fx.settle("inbox").await;
    let backend = Arc::clone(&fx.backend);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(55)).await;
        backend.insert("inbox", mail("new mail")).unwrap();
    });
    let started = Instant::now();

    let response = fx
        .sync(&one(collection("inbox", &key)).with_heartbeat(300))
        .await;
    assert_eq!(started.elapsed(), Duration::from_secs(60));
    let inbox = response.collection("inbox").unwrap();
    assert_eq!(inbox.commands.len(), 1);
    assert!(inbox.sync_key.follows(&key));
    let cache = fx.store.load_cache(DEVICE).unwrap();
    assert!(!cache.has_ping_change("inbox"));
    assert!(cache.last_sync_end_normal.is_some());
}

#[tokio::test(start_paused = true)]
async fn long_poll_without_changes_sends_empty_response() {
    let fx = Fixture::new();
    let key = fx.settle("inbox").await;
    let response = fx
        .sync(&one(collection("inbox", &key)).with_wait(1))
        .await;
    assert!(response.is_empty());
    assert!(fx.store.load_state(DEVICE, "inbox", &key).is_ok());
}

#[tokio::test(start_paused = true)]
async fn concurrent_request_makes_long_poll_stale() {
    let fx = Fixture::new();
    let key = fx.settle("inbox").await;
    let store = Arc::clone(&fx.store);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        let mut cache = store.load_cache(DEVICE).unwrap();
        store.save_cache(DEVICE, &mut cache).unwrap();
    });

    let response = fx
        .sync(&one(collection("inbox", &key)).with_heartbeat(600))
        .await;
    assert_eq!(response.status, SyncStatus::KeyMismatch);
    assert!(fx.store.load_state(DEVICE, "inbox", &key).is_ok());
}

#[tokio::test(start_paused = true)]
async fn cancellation_ends_long_poll() {
    let fx = Fixture::new();
    let key = fx.settle("inbox").await;
    let (handle, cancellation) = Cancellation::channel();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(20)).await;
        handle.cancel();
    });
    let ctx = RequestContext::new(DEVICE, V14).with_cancellation(cancellation);
    let started = Instant::now();

    let result = fx
        .sync_as(&ctx, &one(collection("inbox", &key)).with_heartbeat(600))
        .await;
    assert!(matches!(result, Err(EngineError::Cancelled)));
    assert_eq!(started.elapsed(), Duration::from_secs(20));
    assert!(fx.store.load_state(DEVICE, "inbox", &key).is_ok());
}

#[tokio::test]
async fn legacy_versions_do_not_long_poll() {
    let fx = Fixture::new();
    let first = fx
        .sync_version(ProtocolVersion::V12_0, &one(collection("inbox", "0")))
        .await;
    let key = key_of(&first, "inbox");
    let response = fx
        .sync_version(
            ProtocolVersion::V12_0,
            &one(collection("inbox", &key)).with_heartbeat(300).with_wait(5),
        )
        .await;
    assert_eq!(response.status, SyncStatus::Success);
    assert!(!response.is_empty());
}

fn add(client_id: &str, subject: &str) -> Command {
    Command::Add {
        client_id: client_id.into(),
        class: None,
        data: mail(subject),
    }
}

fn filtered(filter: FilterType) -> CollectionOptions {
    CollectionOptions {
        filter_type: Some(filter),
        ..CollectionOptions::default()
    }
}

#[tokio::test]
async fn transient_add_failure_reports_earlier_adds() {
    let fx = Fixture::new();
    let key = fx.settle("inbox").await;
    fx.backend
        .fail_adds_after(1, BackendError::temporary("store busy"));

    let request = one(
        collection("inbox", &key)
            .with_command(add("c1", "first"))
            .with_command(add("c2", "second")),
    );
    let response = fx.sync(&request).await;
    let inbox = response.collection("inbox").unwrap();
    assert_eq!(inbox.status, SyncStatus::Success);
    assert!(inbox.sync_key.follows(&key));
    let adds = &inbox.replies.adds;
    assert_eq!(adds.len(), 2);
    assert_eq!(adds[0].client_id, "c1");
    assert_eq!(adds[0].status, SyncStatus::Success);
    assert!(adds[0].server_id.is_some());
    assert_eq!(adds[1].client_id, "c2");
    assert_eq!(adds[1].status, SyncStatus::ServerErrorRetry);
    assert!(adds[1].server_id.is_none());
    assert_eq!(fx.backend.item_ids("inbox").len(), 1);

    fx.backend.clear_add_failure();
    let retry = one(collection("inbox", &inbox.sync_key).with_command(add("c2", "second")));
    let response = fx.sync(&retry).await;
    let inbox = response.collection("inbox").unwrap();
    assert_eq!(inbox.replies.adds[0].status, SyncStatus::Success);
    assert_eq!(fx.backend.item_ids("inbox").len(), 2);
}

#[tokio::test]
async fn narrowing_the_filter_soft_deletes_old_items() {
    let fx = Fixture::new();
    let recent = fx.backend.insert_aged("inbox", mail("recent"), 1).unwrap();
    let old = fx.backend.insert_aged("inbox", mail("old"), 20).unwrap();

    let first = fx
        .sync(&one(collection("inbox", "0").with_options(filtered(FilterType::ALL))))
        .await;
    let inbox = first.collection("inbox").unwrap();
    let sent: BTreeSet<_> = inbox.commands.iter().map(|c| c.server_id.clone()).collect();
    assert_eq!(sent, BTreeSet::from([recent.clone(), old.clone()]));

    let narrowed = fx
        .sync(&one(
            collection("inbox", &inbox.sync_key).with_options(filtered(FilterType::ONE_WEEK)),
        ))
        .await;
    let inbox = narrowed.collection("inbox").unwrap();
    let commands: Vec<_> = inbox
        .commands
        .iter()
        .map(|c| (c.server_id.clone(), c.kind))
        .collect();
    assert_eq!(commands, vec![(old.clone(), ChangeKind::SoftDelete)]);

    let widened = fx
        .sync(&one(
            collection("inbox", &inbox.sync_key).with_options(filtered(FilterType::ALL)),
        ))
        .await;
    let commands: Vec<_> = widened
        .collection("inbox")
        .unwrap()
        .commands
        .iter()
        .map(|c| (c.server_id.clone(), c.kind))
        .collect();
    assert_eq!(commands, vec![(old, ChangeKind::Add)]);
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn responses_respect_every_window(
        counts in vec(0usize..12, 1..4),
        windows in vec(1u32..8, 4),
        global in 1u32..20,
    ) {
        runtime().block_on(async {
            let fx = Fixture::new();
            let mut request = SyncRequest::new().with_window_size(global);
            for (i, count) in counts.iter().enumerate() {
                let folder = format!("f{i}");
                fx.backend.add_folder(folder.clone(), CollectionClass::Email);
                fx.seed(&folder, *count);
                request = request
                    .with_collection(collection(&folder, "0").with_window_size(windows[i]));
            }

            let response = fx.sync(&request).await;
            let mut total = 0;
            for (i, folder) in response.collections.iter().enumerate() {
                assert!(folder.commands.len() <= windows[i] as usize);
                total += folder.commands.len();
            }
            assert!(total <= global as usize);
        });
    }
}
