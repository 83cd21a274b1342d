//! Diff visitor applying canonical feature changes to a quad-tree builder.
//!
//! Changes are buffered in walk order. When the buffer is full, or the walk
//! leaves the root tree, the feature payloads the batch needs are fetched
//! in bulk on a prefetch worker and the changes are applied to the builder
//! in the order they were reported.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use strata_diff::DiffVisitor;
use strata_store::{prefetch_all, ObjectKind, ObjectStore, StoreError};
use strata_tree::{ExtraData, FeatureType, Node, NodeKind, QuadClustering, RevFeature, TreeBuilder, TreeStore};
use strata_types::{Envelope, Geometry, ObjectId, Value};
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::error::{IndexError, IndexResult};
use crate::info::IndexInfo;
use crate::progress::ProgressListener;

/// Extra-data key holding the materialized attribute map of an index node.
pub const ATTRIBUTES_KEY: &str = "@attributes";

/// Ids per bulk read issued by the prefetch worker.
const FETCH_CHUNK_SIZE: usize = 128;

/// Counters for one index build.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub added: u64,
    pub removed: u64,
    pub updated: u64,
    /// Features without a geometry, which the index cannot place.
    pub skipped: u64,
    /// Features inserted although their bounds leave the index extent.
    pub out_of_bounds: u64,
    pub batches: u64,
}

enum Change {
    Add(Node),
    Remove(Node),
    Update(Node, Node),
}

fn inconsistent(node: &Node, reason: impl Into<String>) -> IndexError {
    IndexError::Inconsistent {
        name: node.name().to_string(),
        reason: reason.into(),
    }
}

fn load_feature_type<'c>(
    store: &dyn ObjectStore,
    cache: &'c mut HashMap<ObjectId, FeatureType>,
    id: ObjectId,
) -> IndexResult<&'c FeatureType> {
    if !cache.contains_key(&id) {
        let feature_type = store.get_feature_type(&id)?;
        cache.insert(id, feature_type);
    }
    cache
        .get(&id)
        .ok_or_else(|| IndexError::MissingObject { id })
}

pub(crate) struct IndexUpdater<'a> {
    store: Arc<dyn ObjectStore>,
    info: &'a IndexInfo,
    config: &'a IndexConfig,
    listener: &'a dyn ProgressListener,
    builder: TreeBuilder<QuadClustering>,
    /// Feature type of nodes that carry no metadata id.
    default_feature_type: Option<ObjectId>,
    feature_types: HashMap<ObjectId, FeatureType>,
    /// Per feature type: is the indexed attribute its default geometry?
    default_geometry: HashMap<ObjectId, bool>,
    pending: Vec<Change>,
    stats: IndexStats,
    processed: u64,
    error: Option<IndexError>,
    cancelled: bool,
}

impl<'a> IndexUpdater<'a> {
    pub(crate) fn new(
        store: Arc<dyn ObjectStore>,
        info: &'a IndexInfo,
        config: &'a IndexConfig,
        listener: &'a dyn ProgressListener,
        builder: TreeBuilder<QuadClustering>,
        default_feature_type: Option<ObjectId>,
    ) -> Self {
        Self {
            store,
            info,
            config,
            listener,
            builder,
            default_feature_type,
            feature_types: HashMap::new(),
            default_geometry: HashMap::new(),
            pending: Vec::new(),
            stats: IndexStats::default(),
            processed: 0,
            error: None,
            cancelled: false,
        }
    }

    /// Apply what is still pending and hand back the builder, or `None` if
    /// the build was cancelled.
    pub(crate) fn finish(mut self) -> IndexResult<Option<(TreeBuilder<QuadClustering>, IndexStats)>> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.flush()?;
        if self.cancelled || self.listener.is_cancelled() {
            return Ok(None);
        }
        Ok(Some((self.builder, self.stats)))
    }

    fn type_id(&self, node: &Node) -> Option<ObjectId> {
        node.metadata_id().or(self.default_feature_type)
    }

    /// Whether the indexed attribute is the default geometry of the type,
    /// the one canonical node bounds are derived from. Fails if the type has
    /// no geometry attribute of that name.
    fn indexes_default_geometry(&mut self, node: &Node, type_id: ObjectId) -> IndexResult<bool> {
        if let Some(is_default) = self.default_geometry.get(&type_id) {
            return Ok(*is_default);
        }
        let feature_type = load_feature_type(&*self.store, &mut self.feature_types, type_id)?;
        let Some((index, _)) = feature_type.geometry_attribute_named(&self.info.attribute) else {
            return Err(inconsistent(
                node,
                format!(
                    "feature type {:?} has no geometry attribute {:?}",
                    feature_type.name(),
                    self.info.attribute
                ),
            ));
        };
        let is_default = feature_type
            .geometry_attribute()
            .is_some_and(|(default, _)| default == index);
        self.default_geometry.insert(type_id, is_default);
        Ok(is_default)
    }

    /// Inserted nodes need their payload for materialized attributes. Point
    /// bounds on the node are used as they are when they describe the
    /// indexed geometry; anything else is read from the payload.
    fn needs_payload(&mut self, node: &Node, inserting: bool) -> IndexResult<bool> {
        if (inserting && self.info.is_materialized()) || !node.bounds().is_some_and(Envelope::is_point) {
            return Ok(true);
        }
        match self.type_id(node) {
            Some(type_id) => Ok(!self.indexes_default_geometry(node, type_id)?),
            None => Ok(false),
        }
    }

    fn flush(&mut self) -> IndexResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.listener.is_cancelled() {
            debug!(pending = self.pending.len(), "discarding batch of cancelled index build");
            self.pending.clear();
            self.cancelled = true;
            return Ok(());
        }
        let changes = std::mem::take(&mut self.pending);
        let payloads = self.fetch(&changes)?;
        let size = changes.len();
        for change in changes {
            self.apply(change, &payloads)?;
        }
        self.stats.batches += 1;
        debug!(
            size,
            fetched = payloads.len(),
            processed = self.processed,
            "applied index batch"
        );
        if self.listener.is_cancelled() {
            self.cancelled = true;
        }
        Ok(())
    }

    /// Fetch every payload the batch needs. All of them must be present.
    fn fetch(&mut self, changes: &[Change]) -> IndexResult<HashMap<ObjectId, RevFeature>> {
        let mut ids = BTreeSet::new();
        for change in changes {
            match change {
                Change::Add(new) => {
                    if self.needs_payload(new, true)? {
                        ids.insert(new.object_id());
                    }
                }
                Change::Remove(old) => {
                    if self.needs_payload(old, false)? {
                        ids.insert(old.object_id());
                    }
                }
                Change::Update(old, new) => {
                    if self.needs_payload(old, false)? {
                        ids.insert(old.object_id());
                    }
                    if self.needs_payload(new, true)? {
                        ids.insert(new.object_id());
                    }
                }
            }
        }
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<ObjectId> = ids.into_iter().collect();
        let mut payloads = HashMap::with_capacity(ids.len());
        let fetched = prefetch_all(
            Arc::clone(&self.store),
            ids.clone(),
            FETCH_CHUNK_SIZE,
            self.config.prefetch_capacity,
        );
        for item in fetched {
            let (id, object) = item?;
            if object.kind != ObjectKind::Feature {
                return Err(StoreError::KindMismatch {
                    id,
                    expected: ObjectKind::Feature,
                    actual: object.kind,
                }
                .into());
            }
            payloads.insert(id, RevFeature::decode(id, &object.data)?);
        }
        if let Some(missing) = ids.iter().find(|id| !payloads.contains_key(*id)) {
            return Err(IndexError::MissingObject { id: *missing });
        }
        Ok(payloads)
    }

    /// The index node for a canonical feature node, or `None` if the
    /// feature has no geometry.
    fn index_node(
        &mut self,
        node: &Node,
        payloads: &HashMap<ObjectId, RevFeature>,
        inserting: bool,
    ) -> IndexResult<Option<Node>> {
        let mut bounds = node.bounds().copied();
        let mut attributes = ExtraData::new();
        let materialize = inserting && self.info.is_materialized();

        if let Some(feature) = payloads.get(&node.object_id()) {
            let type_id = self
                .type_id(node)
                .ok_or_else(|| inconsistent(node, "feature has no feature type"))?;
            self.indexes_default_geometry(node, type_id)?;
            let feature_type = load_feature_type(&*self.store, &mut self.feature_types, type_id)?;
            bounds = feature
                .geometry_named(feature_type, &self.info.attribute)
                .and_then(Geometry::envelope);
            if materialize {
                for name in &self.info.materialized_attributes {
                    let value = feature.attribute(feature_type, name).cloned().unwrap_or(Value::Null);
                    attributes.insert(name.clone(), value);
                }
            }
        }

        let Some(bounds) = bounds else {
            debug!(feature = node.name(), "feature has no geometry, not indexed");
            return Ok(None);
        };
        let mut extra = node.extra_data()?.clone();
        if materialize {
            extra.insert(ATTRIBUTES_KEY.to_string(), Value::Map(attributes));
        }
        let index_node = Node::new(
            NodeKind::Feature,
            node.name(),
            node.object_id(),
            node.metadata_id(),
            Some(bounds),
        )
        .with_extra_data(extra);
        Ok(Some(index_node))
    }

    fn check_extent(&mut self, node: &Node) {
        let Some(bounds) = node.bounds() else {
            return;
        };
        if self.info.max_bounds.contains(bounds) {
            return;
        }
        self.stats.out_of_bounds += 1;
        if self.info.bounds_estimated {
            warn!(
                index = %self.info.tree_name,
                feature = node.name(),
                ?bounds,
                "feature lies outside the estimated index extent, the index should be rebuilt"
            );
        } else {
            debug!(feature = node.name(), ?bounds, "feature lies outside the index extent");
        }
    }

    fn insert(&mut self, node: Node) -> IndexResult<()> {
        self.check_extent(&node);
        self.builder.put(node)?;
        Ok(())
    }

    fn remove(&mut self, canonical: &Node, node: &Node) -> IndexResult<()> {
        if !self.builder.remove(node)? {
            return Err(inconsistent(canonical, "removed feature is not in the index tree"));
        }
        Ok(())
    }

    fn apply(&mut self, change: Change, payloads: &HashMap<ObjectId, RevFeature>) -> IndexResult<()> {
        match change {
            Change::Add(new) => match self.index_node(&new, payloads, true)? {
                Some(node) => {
                    self.insert(node)?;
                    self.stats.added += 1;
                }
                None => self.stats.skipped += 1,
            },
            Change::Remove(old) => match self.index_node(&old, payloads, false)? {
                Some(node) => {
                    self.remove(&old, &node)?;
                    self.stats.removed += 1;
                }
                None => self.stats.skipped += 1,
            },
            Change::Update(old, new) => {
                let old_node = self.index_node(&old, payloads, false)?;
                let new_node = self.index_node(&new, payloads, true)?;
                match (old_node, new_node) {
                    (Some(o), Some(n)) => {
                        self.check_extent(&n);
                        if !self.builder.update(&o, n)? {
                            return Err(inconsistent(&old, "updated feature is not in the index tree"));
                        }
                    }
                    (Some(o), None) => self.remove(&old, &o)?,
                    (None, Some(n)) => self.insert(n)?,
                    (None, None) => self.stats.skipped += 1,
                }
                self.stats.updated += 1;
            }
        }
        self.processed += 1;
        self.listener.progress(self.processed);
        Ok(())
    }

    /// Flush and report whether the walk may continue.
    fn flush_or_stop(&mut self) -> bool {
        match self.flush() {
            Ok(()) => !self.cancelled,
            Err(err) => {
                self.error = Some(err);
                false
            }
        }
    }
}

fn is_root(left: Option<&Node>, right: Option<&Node>) -> bool {
    left.or(right).is_some_and(|n| n.name().is_empty())
}

impl DiffVisitor for IndexUpdater<'_> {
    /// Only the features of the indexed tree itself are indexed.
    fn visit_tree(&mut self, left: Option<&Node>, right: Option<&Node>) -> bool {
        is_root(left, right)
    }

    fn end_tree(&mut self, left: Option<&Node>, right: Option<&Node>) {
        if is_root(left, right) {
            self.flush_or_stop();
        }
    }

    fn on_feature(&mut self, left: Option<&Node>, right: Option<&Node>) -> bool {
        let change = match (left, right) {
            (None, Some(new)) => Change::Add(new.clone()),
            (Some(old), None) => Change::Remove(old.clone()),
            (Some(old), Some(new)) => Change::Update(old.clone(), new.clone()),
            (None, None) => return true,
        };
        self.pending.push(change);
        if self.pending.len() >= self.config.batch_size.max(1) {
            return self.flush_or_stop();
        }
        true
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled || self.error.is_some() || self.listener.is_cancelled()
    }
}
