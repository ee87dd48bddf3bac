//! Continuously synchronizing observers.
//!
//! An [`ObserverCache`] folds a kube watch stream into a local cache keyed
//! by `namespace/name` and reports the add/update/delete changes each event
//! implies. An [`ObserverGroup`] drives every observer of one namespace on a
//! single task with one shared resync cadence.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};
use kube::api::DynamicObject;
use kube::runtime::watcher::{self, Event};

use super::handler::ResourceEventHandler;
use crate::lifecycle::stop::{deadline_after, sleep_until_deadline};
use crate::lifecycle::StopSignal;

/// One item of a watch stream.
pub type WatchItem = std::result::Result<Event<DynamicObject>, watcher::Error>;

/// A change derived from the watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedChange {
    Added(DynamicObject),
    Updated {
        old: Box<DynamicObject>,
        new: Box<DynamicObject>,
    },
    Deleted(DynamicObject),
}

pub(crate) fn object_key(obj: &DynamicObject) -> String {
    format!(
        "{}/{}",
        obj.metadata.namespace.as_deref().unwrap_or_default(),
        obj.metadata.name.as_deref().unwrap_or_default()
    )
}

fn same_version(a: &DynamicObject, b: &DynamicObject) -> bool {
    a.metadata.resource_version.is_some()
        && a.metadata.resource_version == b.metadata.resource_version
}

/// Local cache of one (namespace, kind) pair.
#[derive(Debug, Default)]
pub struct ObserverCache {
    objects: BTreeMap<String, DynamicObject>,
    relist: Option<BTreeMap<String, DynamicObject>>,
    synced: bool,
}

impl ObserverCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the first full listing completed. Never resets.
    pub fn has_synced(&self) -> bool {
        self.synced
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Folds one watch event into the cache.
    pub fn apply(&mut self, event: Event<DynamicObject>) -> Vec<ObservedChange> {
        match event {
            Event::Init => {
                self.relist = Some(BTreeMap::new());
                Vec::new()
            }
            Event::InitApply(obj) => {
                let relist = self.relist.get_or_insert_with(BTreeMap::new);
                relist.insert(object_key(&obj), obj);
                Vec::new()
            }
            Event::InitDone => self.finish_relist(),
            Event::Apply(obj) => {
                let key = object_key(&obj);
                match self.objects.insert(key, obj.clone()) {
                    Some(old) => vec![ObservedChange::Updated {
                        old: Box::new(old),
                        new: Box::new(obj),
                    }],
                    None => vec![ObservedChange::Added(obj)],
                }
            }
            Event::Delete(obj) => {
                let removed = self.objects.remove(&object_key(&obj));
                vec![ObservedChange::Deleted(removed.unwrap_or(obj))]
            }
        }
    }

    /// Replaces the cache with the relisted objects. Objects missing from
    /// the listing are reported deleted.
    fn finish_relist(&mut self) -> Vec<ObservedChange> {
        let listed = self.relist.take().unwrap_or_default();
        let mut changes = Vec::new();

        for (key, obj) in &listed {
            match self.objects.get(key) {
                None => changes.push(ObservedChange::Added(obj.clone())),
                Some(old) if !same_version(old, obj) => changes.push(ObservedChange::Updated {
                    old: Box::new(old.clone()),
                    new: Box::new(obj.clone()),
                }),
                Some(_) => {}
            }
        }

        for (key, obj) in &self.objects {
            if !listed.contains_key(key) {
                changes.push(ObservedChange::Deleted(obj.clone()));
            }
        }

        self.objects = listed;
        self.synced = true;
        changes
    }

    /// Redelivers every cached object as an update with old == new.
    pub fn resync(&self) -> Vec<ObservedChange> {
        self.objects
            .values()
            .map(|obj| ObservedChange::Updated {
                old: Box::new(obj.clone()),
                new: Box::new(obj.clone()),
            })
            .collect()
    }
}

/// One observer inside a group: its label, cache, and public sync flag.
pub(crate) struct Observer {
    pub label: String,
    pub cache: ObserverCache,
    pub synced: Arc<AtomicBool>,
}

/// Every observer of one namespace, driven on a single task.
pub(crate) struct ObserverGroup {
    pub namespace: String,
    pub observers: Vec<Observer>,
    pub streams: Vec<BoxStream<'static, WatchItem>>,
}

impl ObserverGroup {
    /// Runs until `stop` fires or every stream ends.
    pub async fn run(
        mut self,
        handlers: Arc<Vec<Arc<dyn ResourceEventHandler>>>,
        resync: Option<Duration>,
        stop: StopSignal,
    ) {
        let streams = std::mem::take(&mut self.streams)
            .into_iter()
            .enumerate()
            .map(|(index, s)| s.map(move |item| (index, item)).boxed());
        let mut merged = stream::select_all(streams);

        let mut next_resync = resync.and_then(deadline_after);

        tracing::info!(namespace = %self.namespace, observers = self.observers.len(), "observer group started");

        loop {
            tokio::select! {
                _ = stop.stopped() => break,
                _ = sleep_until_deadline(next_resync) => {
                    for observer in &self.observers {
                        dispatch(&handlers, observer.cache.resync()).await;
                    }
                    next_resync = resync.and_then(deadline_after);
                }
                item = merged.next() => match item {
                    Some((index, Ok(event))) => {
                        let Some(observer) = self.observers.get_mut(index) else { continue };
                        let changes = observer.cache.apply(event);
                        if observer.cache.has_synced() && !observer.synced.load(Ordering::Acquire) {
                            tracing::info!(observer = %observer.label, objects = observer.cache.len(), "observer synced");
                            observer.synced.store(true, Ordering::Release);
                        }
                        dispatch(&handlers, changes).await;
                    }
                    Some((index, Err(e))) => {
                        let label = self.observers.get(index).map(|o| o.label.as_str()).unwrap_or_default();
                        tracing::warn!(observer = %label, error = %e, "watch error");
                    }
                    None => break,
                },
            }
        }

        tracing::info!(namespace = %self.namespace, "observer group stopped");
    }
}

pub(crate) async fn dispatch(
    handlers: &[Arc<dyn ResourceEventHandler>],
    changes: Vec<ObservedChange>,
) {
    for change in changes {
        for handler in handlers {
            match &change {
                ObservedChange::Added(obj) => handler.on_add(obj).await,
                ObservedChange::Updated { old, new } => handler.on_update(old, new).await,
                ObservedChange::Deleted(obj) => handler.on_delete(obj).await,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::lifecycle::StopHandle;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    pub(crate) fn object(name: &str, version: &str, app: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": name,
                "namespace": "default",
                "resourceVersion": version,
                "labels": {"app": app}
            },
            "data": {"key": "value"}
        }))
        .unwrap()
    }

    fn names(changes: &[ObservedChange]) -> Vec<String> {
        changes
            .iter()
            .map(|c| match c {
                ObservedChange::Added(o) => format!("add {}", object_key(o)),
                ObservedChange::Updated { new, .. } => format!("update {}", object_key(new)),
                ObservedChange::Deleted(o) => format!("delete {}", object_key(o)),
            })
            .collect()
    }

    #[test]
    fn test_initial_list_adds_and_syncs() {
        let mut cache = ObserverCache::new();
        assert!(cache.apply(Event::Init).is_empty());
        assert!(cache.apply(Event::InitApply(object("a", "1", "x"))).is_empty());
        assert!(cache.apply(Event::InitApply(object("b", "1", "x"))).is_empty());
        assert!(!cache.has_synced());

        let changes = cache.apply(Event::InitDone);
        assert_eq!(names(&changes), vec!["add default/a", "add default/b"]);
        assert!(cache.has_synced());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_apply_and_delete() {
        let mut cache = ObserverCache::new();
        let changes = cache.apply(Event::Apply(object("a", "1", "x")));
        assert_eq!(names(&changes), vec!["add default/a"]);

        let changes = cache.apply(Event::Apply(object("a", "2", "y")));
        match &changes[..] {
            [ObservedChange::Updated { old, new }] => {
                assert_eq!(old.metadata.resource_version.as_deref(), Some("1"));
                assert_eq!(new.metadata.resource_version.as_deref(), Some("2"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let changes = cache.apply(Event::Delete(object("a", "3", "y")));
        assert_eq!(names(&changes), vec!["delete default/a"]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_relist_reconciles_cache() {
        let mut cache = ObserverCache::new();
        for event in [
            Event::Init,
            Event::InitApply(object("a", "1", "x")),
            Event::InitApply(object("b", "1", "x")),
            Event::InitDone,
        ] {
            cache.apply(event);
        }

        cache.apply(Event::Init);
        cache.apply(Event::InitApply(object("a", "1", "x")));
        cache.apply(Event::InitApply(object("c", "1", "x")));
        cache.apply(Event::InitApply(object("b", "5", "z")));
        let changes = cache.apply(Event::InitDone);

        assert_eq!(
            names(&changes),
            vec!["update default/b", "add default/c"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
        assert_eq!(cache.len(), 3);

        cache.apply(Event::Init);
        cache.apply(Event::InitApply(object("a", "1", "x")));
        let changes = cache.apply(Event::InitDone);
        assert_eq!(names(&changes), vec!["delete default/b", "delete default/c"]);
        assert!(cache.has_synced());
    }

    #[test]
    fn test_resync_redelivers_identical_updates() {
        let mut cache = ObserverCache::new();
        cache.apply(Event::Apply(object("a", "1", "x")));
        let changes = cache.resync();
        match &changes[..] {
            [ObservedChange::Updated { old, new }] => assert_eq!(old, new),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingHandler {
        pub seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResourceEventHandler for RecordingHandler {
        async fn on_add(&self, obj: &DynamicObject) {
            self.seen.lock().unwrap().push(format!("add {}", object_key(obj)));
        }
        async fn on_update(&self, _old: &DynamicObject, new: &DynamicObject) {
            self.seen.lock().unwrap().push(format!("update {}", object_key(new)));
        }
        async fn on_delete(&self, obj: &DynamicObject) {
            self.seen.lock().unwrap().push(format!("delete {}", object_key(obj)));
        }
    }

    #[tokio::test]
    async fn test_group_dispatches_and_marks_synced() {
        let events: Vec<WatchItem> = vec![
            Ok(Event::Init),
            Ok(Event::InitApply(object("a", "1", "x"))),
            Ok(Event::InitDone),
            Ok(Event::Apply(object("a", "2", "y"))),
            Ok(Event::Delete(object("a", "3", "y"))),
        ];
        let synced = Arc::new(AtomicBool::new(false));
        let group = ObserverGroup {
            namespace: "default".to_string(),
            observers: vec![Observer {
                label: "default v1/configmaps".to_string(),
                cache: ObserverCache::new(),
                synced: Arc::clone(&synced),
            }],
            streams: vec![stream::iter(events).boxed()],
        };

        let recorder = Arc::new(RecordingHandler::default());
        let handlers: Vec<Arc<dyn ResourceEventHandler>> = vec![recorder.clone() as Arc<dyn ResourceEventHandler>];
        let (_stop_handle, stop) = StopHandle::new();

        tokio::time::timeout(
            Duration::from_secs(5),
            group.run(Arc::new(handlers), None, stop),
        )
        .await
        .expect("group did not finish when the stream ended");

        assert!(synced.load(Ordering::Acquire));
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec!["add default/a", "update default/a", "delete default/a"]
        );
    }

    #[tokio::test]
    async fn test_group_stops_on_signal() {
        let group = ObserverGroup {
            namespace: "default".to_string(),
            observers: vec![Observer {
                label: "default v1/configmaps".to_string(),
                cache: ObserverCache::new(),
                synced: Arc::new(AtomicBool::new(false)),
            }],
            streams: vec![stream::pending().boxed()],
        };
        let (stop_handle, stop) = StopHandle::new();
        let task = tokio::spawn(group.run(Arc::new(Vec::new()), Some(Duration::from_millis(10)), stop));

        stop_handle.stop();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("group ignored stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_group_with_unbounded_resync_still_runs() {
        let events: Vec<WatchItem> = vec![
            Ok(Event::Init),
            Ok(Event::InitApply(object("a", "1", "x"))),
            Ok(Event::InitDone),
        ];
        let synced = Arc::new(AtomicBool::new(false));
        let group = ObserverGroup {
            namespace: "default".to_string(),
            observers: vec![Observer {
                label: "default v1/configmaps".to_string(),
                cache: ObserverCache::new(),
                synced: Arc::clone(&synced),
            }],
            streams: vec![stream::iter(events).boxed()],
        };

        let recorder = Arc::new(RecordingHandler::default());
        let handlers: Vec<Arc<dyn ResourceEventHandler>> = vec![recorder.clone() as Arc<dyn ResourceEventHandler>];
        let (_stop_handle, stop) = StopHandle::new();

        tokio::time::timeout(
            Duration::from_secs(5),
            group.run(Arc::new(handlers), Some(Duration::MAX), stop),
        )
        .await
        .expect("group did not finish when the stream ended");

        assert!(synced.load(Ordering::Acquire));
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["add default/a"]);
    }
}
