//! Request dispatch
//!
//! [`IndexService`] owns the tree, the row store and the rebalancer, and
//! answers one request at a time. Handlers never decrypt or compare values;
//! they only follow links, check structure and read or write rows.

use mope_core::{
    Ciphertext, Direction, ErrorReply, InsertRequest, Opc, Path, Request, Response, TreeConfig,
};

use crate::error::{Result, ServerError};
use crate::rebalance::{RebalanceOutcome, Rebalancer};
use crate::stats::{InsertKind, InsertStats};
use crate::store::TreeStore;
use crate::tree::IndexTree;

/// Index tree plus the rows backing it
pub struct IndexService<S> {
    tree: IndexTree,
    store: S,
    rebalancer: Rebalancer,
    stats: InsertStats,
}

impl<S: TreeStore> IndexService<S> {
    /// Rebuild the tree from the store's rows
    pub fn open(store: S, config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let tree = load_tree(&store)?;

        Ok(Self {
            tree,
            store,
            rebalancer: Rebalancer::new(config.balance_threshold),
            stats: InsertStats::new(),
        })
    }

    pub fn tree(&self) -> &IndexTree {
        &self.tree
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stats(&self) -> &InsertStats {
        &self.stats
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Discard the in-memory tree and rebuild it from the store
    pub fn reload(&mut self) -> Result<()> {
        self.tree = load_tree(&self.store)?;
        Ok(())
    }

    /// Answer one request
    pub fn handle(&mut self, request: Request) -> Result<Response> {
        self.stats.record_request(request.kind());

        match request {
            Request::GetRoot => Ok(Response::Root(
                self.tree.root().map(|id| self.tree.node(id).value().clone()),
            )),
            Request::MoveLeft(value) => self.step(&value, Direction::Left),
            Request::MoveRight(value) => self.step(&value, Direction::Right),
            Request::Insert(insert) => self.insert(insert),
            Request::FindNodePath(values) => self.find_node_paths(&values),
            Request::GetCommonNode(a, b) => self.common_node(&a, &b),
            Request::Query(value) => Ok(Response::Records(self.store.select_value(&value)?)),
            Request::RangeQuery { min, max } => self.range_query(min.as_ref(), max.as_ref()),
        }
    }

    /// Turn a failed request into the reply that ends the session
    ///
    /// Failures that can leave the tree ahead of the store trigger a reload.
    pub fn recover(&mut self, error: &ServerError) -> ErrorReply {
        tracing::warn!(code = error.code(), error = %error, "Request failed; closing session");

        if error.is_storage() || matches!(error, ServerError::Codec(_) | ServerError::Corrupt(_)) {
            match self.reload() {
                Ok(()) => tracing::info!(nodes = self.tree.len(), "Reloaded tree from store"),
                Err(e) => tracing::error!(error = %e, "Reload after failure failed"),
            }
        }

        error.to_reply()
    }

    fn step(&self, value: &Ciphertext, direction: Direction) -> Result<Response> {
        let id = self.tree.lookup(value)?;
        let child = self
            .tree
            .child(id, direction)
            .map(|child| self.tree.node(child).value().clone());
        Ok(Response::Child(child))
    }

    fn find_node_paths(&self, values: &[Ciphertext]) -> Result<Response> {
        let paths = values
            .iter()
            .map(|value| -> Result<Path> {
                let id = self.tree.lookup(value)?;
                Ok(self.tree.node(id).path().clone())
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Response::NodePaths(paths))
    }

    fn common_node(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Response> {
        let a = self.tree.lookup(a)?;
        let b = self.tree.lookup(b)?;
        let ancestor = self.tree.common_ancestor(a, b).ok_or_else(|| {
            let prefix = self.tree.node(a).path().common_prefix(self.tree.node(b).path());
            ServerError::UnknownPath(prefix.to_string())
        })?;

        let node = self.tree.node(ancestor);
        Ok(Response::CommonNode {
            value: node.value().clone(),
            path: node.path().clone(),
        })
    }

    fn opc_of(&self, value: &Ciphertext) -> Result<Opc> {
        let id = self.tree.lookup(value)?;
        Ok(Opc::encode(self.tree.node(id).path())?)
    }

    fn range_query(&self, min: Option<&Ciphertext>, max: Option<&Ciphertext>) -> Result<Response> {
        let lo = min.map(|value| self.opc_of(value)).transpose()?;
        let hi = max.map(|value| self.opc_of(value)).transpose()?;
        Ok(Response::Records(self.store.select_opc_range(lo, hi)?))
    }

    fn insert(&mut self, request: InsertRequest) -> Result<Response> {
        let InsertRequest {
            parent,
            value,
            direction,
            path,
        } = request;

        let Some(parent) = parent else {
            return self.insert_root(value, path);
        };
        let parent_id = self.tree.lookup(&parent)?;

        if parent == value {
            let opc = Opc::encode(self.tree.node(parent_id).path())?;
            let record_id = self.store.insert_row(&value, opc)?;
            self.tree.append_record(parent_id, record_id);
            self.stats
                .record_insert(InsertKind::Duplicate, &RebalanceOutcome::default(), self.tree.len());
            return Ok(Response::Inserted(Some(value)));
        }

        let direction = direction.ok_or_else(|| ServerError::MissingDirection {
            parent: parent.clone(),
        })?;
        let slot = self.tree.check_slot(parent_id, direction, &value)?;
        if slot != path {
            return Err(ServerError::path_mismatch(&path, &slot));
        }
        // Too deep to label: reject before the tree changes
        Opc::encode(&slot)?;

        // Row and relabels are persisted together once the tree has settled;
        // until then only the tree has changed and `recover` can reload it
        let new_id = self.tree.attach(parent_id, direction, value.clone())?;
        let mut outcome = self.rebalancer.rebalance_upwards(&mut self.tree, parent_id)?;
        let relabels = outcome
            .take_relabelled()
            .into_iter()
            .filter(|&id| id != new_id)
            .map(|id| -> Result<(Ciphertext, Opc)> {
                let node = self.tree.node(id);
                Ok((node.value().clone(), Opc::encode(node.path())?))
            })
            .collect::<Result<Vec<_>>>()?;
        let opc = Opc::encode(self.tree.node(new_id).path())?;

        let record_id = self.store.apply_insert(&value, opc, &relabels)?;
        self.tree.append_record(new_id, record_id);

        self.stats
            .record_insert(InsertKind::Leaf, &outcome, self.tree.len());
        Ok(Response::Inserted(Some(value)))
    }

    fn insert_root(&mut self, value: Ciphertext, path: Path) -> Result<Response> {
        if !self.tree.is_empty() {
            return Err(ServerError::RootExists);
        }
        if !path.is_empty() {
            return Err(ServerError::path_mismatch(&path, &Path::root()));
        }

        let record_id = self.store.insert_row(&value, Opc::ROOT)?;
        self.tree.insert_root(value.clone(), record_id)?;
        self.stats
            .record_insert(InsertKind::Root, &RebalanceOutcome::default(), self.tree.len());
        Ok(Response::Inserted(Some(value)))
    }
}

fn load_tree<S: TreeStore>(store: &S) -> Result<IndexTree> {
    let rows = store.rows()?;
    let row_count = rows.len();
    let tree = IndexTree::from_records(rows)?;
    tree.verify()?;

    tracing::info!(rows = row_count, nodes = tree.len(), "Restored index tree");
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebalance::max_imbalance;
    use crate::store::{MemoryStore, StoreError};
    use mope_core::{Record, RecordId};

    fn ct(s: &str) -> Ciphertext {
        Ciphertext::from(s.as_bytes())
    }

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    fn service(threshold: u32) -> IndexService<MemoryStore> {
        IndexService::open(
            MemoryStore::new(),
            TreeConfig::with_balance_threshold(threshold).unwrap(),
        )
        .unwrap()
    }

    fn child(svc: &mut IndexService<MemoryStore>, value: Ciphertext, direction: Direction) -> Option<Ciphertext> {
        match svc.handle(Request::step(value, direction)).unwrap() {
            Response::Child(child) => child,
            other => panic!("unexpected {other:?}"),
        }
    }

    /// Navigate with plaintext order on the raw bytes, as a client would
    fn insert(svc: &mut IndexService<MemoryStore>, value: &str) {
        let mut cursor = match svc.handle(Request::GetRoot).unwrap() {
            Response::Root(root) => root,
            other => panic!("unexpected {other:?}"),
        };
        let mut path = Path::root();
        let mut parent: Option<(Ciphertext, Direction)> = None;

        let request = loop {
            let Some(here) = cursor else {
                break match parent {
                    None => InsertRequest {
                        parent: None,
                        value: ct(value),
                        direction: None,
                        path,
                    },
                    Some((parent, direction)) => InsertRequest {
                        parent: Some(parent),
                        value: ct(value),
                        direction: Some(direction),
                        path,
                    },
                };
            };
            let direction = match value.as_bytes().cmp(here.as_bytes()) {
                std::cmp::Ordering::Less => Direction::Left,
                std::cmp::Ordering::Greater => Direction::Right,
                std::cmp::Ordering::Equal => {
                    break InsertRequest {
                        parent: Some(here.clone()),
                        value: here,
                        direction: Some(Direction::Left),
                        path,
                    }
                }
            };
            path.push(direction);
            cursor = child(svc, here.clone(), direction);
            parent = Some((here, direction));
        };

        assert_eq!(
            svc.handle(Request::Insert(request)).unwrap(),
            Response::Inserted(Some(ct(value)))
        );
    }

    fn in_order<S: TreeStore>(svc: &IndexService<S>) -> Vec<Ciphertext> {
        let tree = svc.tree();
        tree.in_order()
            .into_iter()
            .map(|id| tree.node(id).value().clone())
            .collect()
    }

    fn assert_rows_match_tree<S: TreeStore>(svc: &IndexService<S>) {
        for record in svc.store().rows().unwrap() {
            let id = svc.tree().find(&record.value).unwrap();
            assert_eq!(record.opc, Opc::encode(svc.tree().node(id).path()).unwrap());
        }
    }

    #[test]
    fn test_four_inserts_keep_order() {
        let mut svc = service(5);
        for v in ["5", "3", "8", "1"] {
            insert(&mut svc, v);
        }

        assert_eq!(in_order(&svc), vec![ct("1"), ct("3"), ct("5"), ct("8")]);
        assert_eq!(svc.handle(Request::GetRoot).unwrap(), Response::Root(Some(ct("5"))));
        assert_rows_match_tree(&svc);
        assert_eq!(svc.stats().inserts(), 4);
    }

    #[test]
    fn test_duplicate_appends_record() {
        let mut svc = service(5);
        for v in ["5", "3", "8"] {
            insert(&mut svc, v);
        }
        let paths_before: Vec<Path> = svc
            .tree()
            .in_order()
            .into_iter()
            .map(|id| svc.tree().node(id).path().clone())
            .collect();

        insert(&mut svc, "5");

        let root = svc.tree().find(&ct("5")).unwrap();
        assert_eq!(svc.tree().len(), 3);
        assert_eq!(svc.tree().node(root).record_ids().len(), 2);
        let paths_after: Vec<Path> = svc
            .tree()
            .in_order()
            .into_iter()
            .map(|id| svc.tree().node(id).path().clone())
            .collect();
        assert_eq!(paths_before, paths_after);

        match svc.handle(Request::Query(ct("5"))).unwrap() {
            Response::Records(records) => assert_eq!(records.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_navigation_requests() {
        let mut svc = service(5);
        for v in ["m", "f", "t", "h"] {
            insert(&mut svc, v);
        }

        assert_eq!(child(&mut svc, ct("m"), Direction::Left), Some(ct("f")));
        assert_eq!(child(&mut svc, ct("f"), Direction::Left), None);

        assert_eq!(
            svc.handle(Request::FindNodePath(vec![ct("h"), ct("t")])).unwrap(),
            Response::NodePaths(vec![p("01"), p("1")])
        );
        assert_eq!(
            svc.handle(Request::GetCommonNode(ct("h"), ct("t"))).unwrap(),
            Response::CommonNode { value: ct("m"), path: Path::root() }
        );
        assert_eq!(
            svc.handle(Request::GetCommonNode(ct("f"), ct("h"))).unwrap(),
            Response::CommonNode { value: ct("f"), path: p("0") }
        );
    }

    #[test]
    fn test_range_query_by_opc() {
        let mut svc = service(5);
        for v in ["m", "f", "t", "h", "a", "x"] {
            insert(&mut svc, v);
        }

        let values = |response: Response| match response {
            Response::Records(records) => records.into_iter().map(|r| r.value).collect::<Vec<_>>(),
            other => panic!("unexpected {other:?}"),
        };

        let between = svc
            .handle(Request::RangeQuery { min: Some(ct("f")), max: Some(ct("m")) })
            .unwrap();
        assert_eq!(values(between), vec![ct("f"), ct("h"), ct("m")]);

        let above = svc.handle(Request::RangeQuery { min: Some(ct("t")), max: None }).unwrap();
        assert_eq!(values(above), vec![ct("t"), ct("x")]);

        let below = svc.handle(Request::RangeQuery { min: None, max: Some(ct("f")) }).unwrap();
        assert_eq!(values(below), vec![ct("a"), ct("f")]);

        let all = svc.handle(Request::RangeQuery { min: None, max: None }).unwrap();
        assert_eq!(values(all).len(), 6);
    }

    #[test]
    fn test_protocol_violations() {
        let mut svc = service(5);
        insert(&mut svc, "m");
        insert(&mut svc, "f");

        let err = svc.handle(Request::MoveLeft(ct("nope"))).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_CIPHERTEXT");

        let second_root = InsertRequest { parent: None, value: ct("z"), direction: None, path: Path::root() };
        assert!(matches!(svc.handle(Request::Insert(second_root)), Err(ServerError::RootExists)));

        let occupied = InsertRequest {
            parent: Some(ct("m")),
            value: ct("a"),
            direction: Some(Direction::Left),
            path: p("0"),
        };
        assert!(matches!(svc.handle(Request::Insert(occupied)), Err(ServerError::SlotOccupied { .. })));

        let wrong_path = InsertRequest {
            parent: Some(ct("m")),
            value: ct("t"),
            direction: Some(Direction::Right),
            path: p("11"),
        };
        assert!(matches!(svc.handle(Request::Insert(wrong_path)), Err(ServerError::PathMismatch { .. })));

        let no_direction = InsertRequest {
            parent: Some(ct("m")),
            value: ct("t"),
            direction: None,
            path: p("1"),
        };
        assert!(matches!(
            svc.handle(Request::Insert(no_direction)),
            Err(ServerError::MissingDirection { .. })
        ));

        let existing = InsertRequest {
            parent: Some(ct("f")),
            value: ct("m"),
            direction: Some(Direction::Left),
            path: p("00"),
        };
        assert!(matches!(svc.handle(Request::Insert(existing)), Err(ServerError::DuplicateNode(_))));

        // Rejected requests leave no rows behind.
        assert_eq!(svc.store().len(), 2);
    }

    #[test]
    fn test_sorted_workload_relabels_rows() {
        let mut svc = service(1);
        let values: Vec<String> = (0..200).map(|i| format!("{:05}", i)).collect();
        for v in &values {
            insert(&mut svc, v);
        }

        svc.tree().verify().unwrap();
        assert!(max_imbalance(svc.tree()) <= 1);
        assert!(svc.stats().rebuilds() > 0);
        assert_rows_match_tree(&svc);
        assert_eq!(
            in_order(&svc),
            values.iter().map(|v| ct(v)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_restart_reproduces_tree() {
        let mut svc = service(2);
        for i in [50, 20, 80, 10, 30, 70, 90, 5, 1, 2, 3, 4, 20] {
            insert(&mut svc, &format!("{:03}", i));
        }
        let before: Vec<(Ciphertext, Path, Vec<RecordId>)> = svc
            .tree()
            .in_order()
            .into_iter()
            .map(|id| {
                let node = svc.tree().node(id);
                (node.value().clone(), node.path().clone(), node.record_ids().to_vec())
            })
            .collect();

        let rows = svc.into_store().rows().unwrap();
        let restarted = IndexService::open(MemoryStore::from_records(rows), TreeConfig::default()).unwrap();
        let after: Vec<(Ciphertext, Path, Vec<RecordId>)> = restarted
            .tree()
            .in_order()
            .into_iter()
            .map(|id| {
                let node = restarted.tree().node(id);
                (node.value().clone(), node.path().clone(), node.record_ids().to_vec())
            })
            .collect();
        assert_eq!(before, after);
    }

    /// Store that starts failing writes after a fixed number of inserts, and
    /// rejects any insert carrying more relabels than allowed. A rejected
    /// batch leaves nothing behind, like an aborted transaction.
    struct FlakyStore {
        inner: MemoryStore,
        writes_left: usize,
        relabels_allowed: usize,
    }

    impl FlakyStore {
        fn new(writes_left: usize, relabels_allowed: usize) -> Self {
            Self { inner: MemoryStore::new(), writes_left, relabels_allowed }
        }

        fn spend_write(&mut self) -> std::result::Result<(), StoreError> {
            if self.writes_left == 0 {
                return Err(StoreError::Unavailable("disk full".to_string()));
            }
            self.writes_left -= 1;
            Ok(())
        }
    }

    impl TreeStore for FlakyStore {
        fn rows(&self) -> std::result::Result<Vec<Record>, StoreError> {
            self.inner.rows()
        }

        fn insert_row(&mut self, value: &Ciphertext, opc: Opc) -> std::result::Result<RecordId, StoreError> {
            self.spend_write()?;
            self.inner.insert_row(value, opc)
        }

        fn update_opc(&mut self, value: &Ciphertext, opc: Opc) -> std::result::Result<usize, StoreError> {
            self.spend_write()?;
            self.inner.update_opc(value, opc)
        }

        fn apply_insert(
            &mut self,
            value: &Ciphertext,
            opc: Opc,
            relabels: &[(Ciphertext, Opc)],
        ) -> std::result::Result<RecordId, StoreError> {
            self.spend_write()?;
            if relabels.len() > self.relabels_allowed {
                return Err(StoreError::Unavailable("relabel write failed".to_string()));
            }
            self.inner.apply_insert(value, opc, relabels)
        }

        fn select_value(&self, value: &Ciphertext) -> std::result::Result<Vec<Record>, StoreError> {
            self.inner.select_value(value)
        }

        fn select_opc_range(&self, lo: Option<Opc>, hi: Option<Opc>) -> std::result::Result<Vec<Record>, StoreError> {
            self.inner.select_opc_range(lo, hi)
        }
    }

    fn leaf(parent: &str, value: &str, direction: Direction, path: &str) -> Request {
        Request::Insert(InsertRequest {
            parent: Some(ct(parent)),
            value: ct(value),
            direction: Some(direction),
            path: p(path),
        })
    }

    fn root(value: &str) -> Request {
        Request::Insert(InsertRequest { parent: None, value: ct(value), direction: None, path: Path::root() })
    }

    #[test]
    fn test_storage_failure_reloads_tree() {
        let store = FlakyStore::new(2, usize::MAX);
        let mut svc = IndexService::open(store, TreeConfig::with_balance_threshold(1).unwrap()).unwrap();

        svc.handle(root("b")).unwrap();
        svc.handle(leaf("b", "a", Direction::Left, "0")).unwrap();

        let err = svc.handle(leaf("b", "c", Direction::Right, "1")).unwrap_err();
        assert!(err.is_storage());

        let reply = svc.recover(&err);
        assert_eq!(reply.code, "STORAGE_ERROR");
        assert_eq!(svc.tree().len(), 2);
        svc.tree().verify().unwrap();
    }

    #[test]
    fn test_failed_relabel_leaves_store_loadable() {
        // Sorted inserts with N=1 rotate at the third value
        let store = FlakyStore::new(usize::MAX, 0);
        let mut svc = IndexService::open(store, TreeConfig::with_balance_threshold(1).unwrap()).unwrap();

        svc.handle(root("a")).unwrap();
        svc.handle(leaf("a", "b", Direction::Right, "1")).unwrap();
        let err = svc.handle(leaf("b", "c", Direction::Right, "11")).unwrap_err();
        assert!(err.is_storage());

        let reply = svc.recover(&err);
        assert_eq!(reply.code, "STORAGE_ERROR");
        assert_eq!(in_order(&svc), vec![ct("a"), ct("b")]);
        svc.tree().verify().unwrap();
        assert_rows_match_tree(&svc);

        let rows = svc.store().rows().unwrap();
        assert_eq!(rows.len(), 2);
        IndexTree::from_records(rows).unwrap().verify().unwrap();
        svc.reload().unwrap();
        assert_eq!(svc.tree().len(), 2);
    }
}
