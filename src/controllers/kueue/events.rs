use futures::{future, Stream, StreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, ResourceExt};
use tracing::*;

use crate::resources::kueues::{Kueue, KUEUE_NAME};

/// A change to a watched object.
///
/// Objects delivered by a (re)list count as created, later applies as updated.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceEvent<K> {
    Created(K),
    Updated(K),
    Deleted(K),
}

impl<K> ResourceEvent<K> {
    pub fn from_watch(event: watcher::Event<K>) -> Option<Self> {
        match event {
            watcher::Event::InitApply(obj) => Some(ResourceEvent::Created(obj)),
            watcher::Event::Apply(obj) => Some(ResourceEvent::Updated(obj)),
            watcher::Event::Delete(obj) => Some(ResourceEvent::Deleted(obj)),
            watcher::Event::Init | watcher::Event::InitDone => None,
        }
    }
}

/// The Kueue to sync after a config map event in its namespace
pub fn config_map_trigger(event: ResourceEvent<ConfigMap>) -> Option<ObjectRef<Kueue>> {
    match event {
        ResourceEvent::Created(_) => None,
        ResourceEvent::Updated(cm) | ResourceEvent::Deleted(cm) => {
            debug!("ConfigMap {} changed", cm.name_any());
            Some(ObjectRef::new(KUEUE_NAME).within(&cm.namespace()?))
        }
    }
}

/// Sync requests for every config map that changes or disappears in the namespace of `api`
pub fn config_map_triggers(api: Api<ConfigMap>) -> impl Stream<Item = ObjectRef<Kueue>> + Send {
    watcher(api, watcher::Config::default())
        .default_backoff()
        .filter_map(|event| {
            future::ready(match event {
                Ok(event) => ResourceEvent::from_watch(event).and_then(config_map_trigger),
                Err(err) => {
                    warn!("Watch of config maps failed: {err}");
                    None
                }
            })
        })
}
