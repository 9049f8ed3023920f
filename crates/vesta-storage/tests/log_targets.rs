use std::sync::{Arc, Mutex};

use tracing_subscriber::{layer::Context, prelude::*, Layer};
use vesta_storage::RecordStore;

struct TargetLayer {
    targets: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for TargetLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.targets
            .lock()
            .expect("targets mutex poisoned")
            .push(event.metadata().target().to_string());
    }
}

#[test]
fn store_events_use_the_storage_target() {
    let tmp = tempfile::tempdir().unwrap();
    let targets = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(TargetLayer {
        targets: targets.clone(),
    });
    let _guard = tracing::subscriber::set_default(subscriber);

    let (mut store, _) = RecordStore::open_or_rebuild(tmp.path()).unwrap();
    store.allocate().unwrap();
    store.close().unwrap();

    let targets = targets.lock().unwrap();
    assert!(!targets.is_empty());
    assert!(
        targets.iter().all(|target| target == "vesta.storage"),
        "{targets:?}"
    );
}
