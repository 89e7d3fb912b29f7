//! Replicated room document on top of `yrs`.
//!
//! A `Doc` holds named root maps and arrays of a `yrs::Doc`. Values are
//! stored as JSON strings so any serde type fits in a cell; reads decode
//! them back and skip (with a warning) anything that does not parse.
//!
//! Local mutations go through [`Doc::transact`]: they are visible to local
//! reads immediately and queued as one v1 [`Update`] for the transport
//! ([`Doc::take_updates`]). Remote updates are merged with
//! [`Doc::apply_update`]. Observers fire once per committed transaction or
//! merged update, naming the root containers whose contents changed.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Any, Array, Map, Out, ReadTxn, Transact, TransactionMut, WriteTxn};

use crate::update::{ClientId, StateVector, Update};

// -- Events --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// Delivered to observers once per transaction or merged remote update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocEvent {
    pub origin: Origin,
    /// Names of the containers whose visible contents changed.
    pub changed: BTreeSet<String>,
}

impl DocEvent {
    pub fn touches(&self, container: &str) -> bool {
        self.changed.contains(container)
    }

    pub fn touches_any(&self, containers: &[&str]) -> bool {
        containers.iter().any(|c| self.touches(c))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(&DocEvent, &Doc)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootKind {
    Map,
    Array,
}

#[derive(Debug, Clone, PartialEq)]
enum RootView {
    Map(MapRef),
    Array(ArrayRef),
}

// -- Document --

pub struct Doc {
    inner: yrs::Doc,
    /// Root containers this replica reads; remote changes are reported for
    /// these only.
    roots: BTreeMap<String, RootKind>,
    outbox: Vec<Update>,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
}

impl Doc {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            inner: yrs::Doc::with_client_id(client_id),
            roots: BTreeMap::new(),
            outbox: Vec::new(),
            observers: Vec::new(),
            next_subscription: 0,
        }
    }

    /// Random ids stay within 32 bits so they survive a trip through
    /// JavaScript peers.
    pub fn with_random_client() -> Self {
        Self::new(u64::from(rand::random::<u32>()))
    }

    pub fn client_id(&self) -> ClientId {
        self.inner.client_id()
    }

    /// Declare a root map so remote changes to it raise events.
    pub fn ensure_map(&mut self, name: &str) {
        self.inner.get_or_insert_map(name);
        self.roots.insert(name.to_string(), RootKind::Map);
    }

    /// Declare a root array so remote changes to it raise events.
    pub fn ensure_array(&mut self, name: &str) {
        self.inner.get_or_insert_array(name);
        self.roots.insert(name.to_string(), RootKind::Array);
    }

    pub fn get_map(&self, name: &str) -> MapRef {
        let root = self.inner.get_or_insert_map(name);
        let txn = self.inner.transact();
        MapRef::read(&root, &txn)
    }

    pub fn get_array(&self, name: &str) -> ArrayRef {
        let root = self.inner.get_or_insert_array(name);
        let txn = self.inner.transact();
        ArrayRef::read(&root, &txn)
    }

    /// Run `f` as one local transaction. Every mutation made inside is
    /// applied immediately, queued as a single update and reported to
    /// observers once.
    pub fn transact<R>(&mut self, f: impl FnOnce(&mut Transaction<'_>) -> R) -> R {
        let before = self.inner.transact().state_vector();
        let (result, touched) = {
            let mut txn = Transaction {
                inner: self.inner.transact_mut(),
                touched: BTreeMap::new(),
            };
            let result = f(&mut txn);
            (result, txn.touched)
        };
        if touched.is_empty() {
            return result;
        }

        let update = self.inner.transact().encode_diff_v1(&before);
        tracing::trace!(
            client = self.client_id(),
            bytes = update.len(),
            "local transaction"
        );
        self.outbox.push(Update::new(update));
        for (name, kind) in &touched {
            self.roots.insert(name.clone(), *kind);
        }
        self.emit(DocEvent {
            origin: Origin::Local,
            changed: touched.into_keys().collect(),
        });
        result
    }

    /// Merge a remote update. Returns true if anything visible changed.
    /// Updates that do not decode are dropped with a warning; updates whose
    /// dependencies are missing wait inside the document until they arrive.
    pub fn apply_update(&mut self, update: Update) -> bool {
        if update.is_empty() {
            return false;
        }
        let decoded = match yrs::Update::decode_v1(update.as_bytes()) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(client = self.client_id(), "dropping malformed update: {}", e);
                return false;
            }
        };

        let before = self.views();
        {
            let mut txn = self.inner.transact_mut();
            if let Err(e) = txn.apply_update(decoded) {
                tracing::warn!(client = self.client_id(), "failed to integrate update: {}", e);
            }
        }
        let after = self.views();

        let changed: BTreeSet<String> = after
            .iter()
            .filter(|(name, view)| before.get(*name) != Some(*view))
            .map(|(name, _)| name.clone())
            .collect();
        if changed.is_empty() {
            return false;
        }
        self.emit(DocEvent {
            origin: Origin::Remote,
            changed,
        });
        true
    }

    /// Drain updates produced by local transactions since the last call.
    pub fn take_updates(&mut self) -> Vec<Update> {
        std::mem::take(&mut self.outbox)
    }

    pub fn state_vector(&self) -> StateVector {
        StateVector::new(self.inner.transact().state_vector().encode_v1())
    }

    /// Everything this replica knows that `remote` does not. A state vector
    /// that fails to decode is treated as empty.
    pub fn diff(&self, remote: &StateVector) -> Update {
        let remote = yrs::StateVector::decode_v1(remote.as_bytes()).unwrap_or_else(|e| {
            tracing::warn!("malformed state vector, sending full state: {}", e);
            yrs::StateVector::default()
        });
        Update::new(self.inner.transact().encode_diff_v1(&remote))
    }

    /// Register a change listener. The listener gets the document by shared
    /// reference and must not try to reach it through a [`DocHandle`].
    pub fn observe(&mut self, observer: impl FnMut(&DocEvent, &Doc) + 'static) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unobserve(&mut self, id: SubscriptionId) {
        self.observers.retain(|(sid, _)| *sid != id);
    }

    fn emit(&mut self, event: DocEvent) {
        let mut observers = std::mem::take(&mut self.observers);
        for (_, observer) in observers.iter_mut() {
            observer(&event, &*self);
        }
        self.observers = observers;
    }

    fn views(&self) -> BTreeMap<String, RootView> {
        self.roots
            .iter()
            .map(|(name, kind)| {
                let view = match kind {
                    RootKind::Map => RootView::Map(self.get_map(name)),
                    RootKind::Array => RootView::Array(self.get_array(name)),
                };
                (name.clone(), view)
            })
            .collect()
    }
}

impl std::fmt::Debug for Doc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Doc")
            .field("client_id", &self.client_id())
            .field("roots", &self.roots.keys().collect::<Vec<_>>())
            .field("outbox", &self.outbox.len())
            .finish()
    }
}

// -- Transactions --

/// Mutation scope handed out by [`Doc::transact`].
pub struct Transaction<'doc> {
    inner: TransactionMut<'doc>,
    touched: BTreeMap<String, RootKind>,
}

impl Transaction<'_> {
    pub fn map(&mut self, name: &str) -> MapRef {
        let root = self.inner.get_or_insert_map(name);
        MapRef::read(&root, &self.inner)
    }

    pub fn array(&mut self, name: &str) -> ArrayRef {
        let root = self.inner.get_or_insert_array(name);
        ArrayRef::read(&root, &self.inner)
    }

    pub fn map_set<T: Serialize + ?Sized>(&mut self, map: &str, key: &str, value: &T) {
        let Some(json) = encode(value) else { return };
        let root = self.inner.get_or_insert_map(map);
        root.insert(&mut self.inner, key, Any::from(json));
        self.touch(map, RootKind::Map);
    }

    pub fn map_delete(&mut self, map: &str, key: &str) {
        let root = self.inner.get_or_insert_map(map);
        if root.remove(&mut self.inner, key).is_some() {
            self.touch(map, RootKind::Map);
        }
    }

    pub fn map_clear(&mut self, map: &str) {
        let root = self.inner.get_or_insert_map(map);
        let keys: Vec<String> = root.keys(&self.inner).map(str::to_string).collect();
        for key in keys {
            root.remove(&mut self.inner, &key);
            self.touch(map, RootKind::Map);
        }
    }

    /// Append values at the end of the array.
    pub fn array_push<T: Serialize>(&mut self, array: &str, values: impl IntoIterator<Item = T>) {
        let root = self.inner.get_or_insert_array(array);
        for value in values {
            let Some(json) = encode(&value) else { continue };
            root.push_back(&mut self.inner, Any::from(json));
            self.touch(array, RootKind::Array);
        }
    }

    /// Delete `count` items starting at `index`. Out-of-range parts are
    /// ignored.
    pub fn array_delete(&mut self, array: &str, index: usize, count: usize) {
        let root = self.inner.get_or_insert_array(array);
        let len = root.len(&self.inner) as usize;
        if index >= len || count == 0 {
            return;
        }
        let count = count.min(len - index);
        root.remove_range(&mut self.inner, index as u32, count as u32);
        self.touch(array, RootKind::Array);
    }

    pub fn array_clear(&mut self, array: &str) {
        self.array_delete(array, 0, usize::MAX);
    }

    fn touch(&mut self, name: &str, kind: RootKind) {
        self.touched.insert(name.to_string(), kind);
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::warn!("dropping unencodable value: {}", e);
            None
        }
    }
}

fn decode<T: DeserializeOwned>(json: &str) -> Option<T> {
    match serde_json::from_str(json) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("skipping malformed replicated value: {}", e);
            None
        }
    }
}

/// The JSON text stored in a cell. Anything else came from a foreign
/// writer and is skipped.
fn stored_json(value: Out) -> Option<String> {
    match value {
        Out::Any(Any::String(json)) => Some(json.to_string()),
        other => {
            tracing::warn!(value = ?other, "skipping non-JSON cell");
            None
        }
    }
}

// -- Read views --

/// Contents of a replicated map at the moment it was read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapRef {
    entries: BTreeMap<String, String>,
}

impl MapRef {
    fn read<T: ReadTxn>(root: &yrs::MapRef, txn: &T) -> Self {
        let entries = root
            .iter(txn)
            .filter_map(|(key, value)| stored_json(value).map(|json| (key.to_string(), json)))
            .collect();
        Self { entries }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.entries.get(key).and_then(|json| decode(json))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Decoded values in key order; malformed entries are skipped.
    pub fn values<T: DeserializeOwned>(&self) -> Vec<T> {
        self.entries.values().filter_map(|json| decode(json)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Contents of a replicated array at the moment it was read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayRef {
    items: Vec<String>,
}

impl ArrayRef {
    fn read<T: ReadTxn>(root: &yrs::ArrayRef, txn: &T) -> Self {
        Self {
            items: root.iter(txn).filter_map(stored_json).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Option<T> {
        self.items.get(index).and_then(|json| decode(json))
    }

    /// Every item decoded in place, so positions line up with
    /// [`Transaction::array_delete`]. Malformed items come back as `None`.
    pub fn entries<T: DeserializeOwned>(&self) -> impl Iterator<Item = Option<T>> + '_ {
        self.items.iter().map(|json| decode(json))
    }

    /// Decoded values in sequence order; malformed entries are skipped.
    pub fn to_vec<T: DeserializeOwned>(&self) -> Vec<T> {
        self.entries().flatten().collect()
    }
}

// -- Shared handle --

/// Cheap clonable handle to one document, shared by every engine bound to
/// the same room (or the lobby). Single-threaded by construction.
#[derive(Clone)]
pub struct DocHandle(Rc<RefCell<Doc>>);

impl DocHandle {
    pub fn new(doc: Doc) -> Self {
        Self(Rc::new(RefCell::new(doc)))
    }

    pub fn read<R>(&self, f: impl FnOnce(&Doc) -> R) -> R {
        f(&self.0.borrow())
    }

    pub fn transact<R>(&self, f: impl FnOnce(&mut Transaction<'_>) -> R) -> R {
        self.0.borrow_mut().transact(f)
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Doc) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }

    pub fn apply_update(&self, update: Update) -> bool {
        self.0.borrow_mut().apply_update(update)
    }

    pub fn take_updates(&self) -> Vec<Update> {
        self.0.borrow_mut().take_updates()
    }

    pub fn observe(&self, observer: impl FnMut(&DocEvent, &Doc) + 'static) -> SubscriptionId {
        self.0.borrow_mut().observe(observer)
    }

    pub fn unobserve(&self, id: SubscriptionId) {
        self.0.borrow_mut().unobserve(id);
    }
}

impl std::fmt::Debug for DocHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&*self.0.borrow(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn replica(client: ClientId) -> Doc {
        let mut doc = Doc::new(client);
        doc.ensure_array("xs");
        doc.ensure_array("opens");
        doc.ensure_map("m");
        doc.ensure_map("global");
        doc
    }

    fn sync(a: &mut Doc, b: &mut Doc) {
        let from_a = Update::merge(a.take_updates()).unwrap();
        let from_b = Update::merge(b.take_updates()).unwrap();
        b.apply_update(from_a);
        a.apply_update(from_b);
    }

    #[test]
    fn test_local_reads_see_own_writes() {
        let mut doc = Doc::new(1);
        doc.transact(|txn| {
            txn.map_set("m", "a", &1);
            assert_eq!(txn.map("m").get::<i32>("a"), Some(1));
            txn.array_push("xs", [1, 2, 3]);
        });
        assert_eq!(doc.get_array("xs").to_vec::<i32>(), vec![1, 2, 3]);
        assert_eq!(doc.get_map("m").get::<i32>("a"), Some(1));
    }

    #[test]
    fn test_one_update_per_transaction() {
        let mut doc = Doc::new(1);
        doc.transact(|txn| {
            txn.array_push("xs", [1, 2]);
            txn.map_set("m", "k", "v");
        });
        doc.transact(|txn| txn.array_push("xs", [3]));
        doc.transact(|txn| txn.map_delete("m", "missing"));
        let updates = doc.take_updates();
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|u| !u.is_empty()));
        assert!(doc.take_updates().is_empty());
    }

    #[test]
    fn test_array_delete_and_clear() {
        let mut doc = Doc::new(1);
        doc.transact(|txn| txn.array_push("xs", [10, 20, 30, 40]));
        doc.transact(|txn| txn.array_delete("xs", 1, 2));
        assert_eq!(doc.get_array("xs").to_vec::<i32>(), vec![10, 40]);
        doc.transact(|txn| txn.array_delete("xs", 5, 3));
        assert_eq!(doc.get_array("xs").len(), 2);
        doc.transact(|txn| txn.array_clear("xs"));
        assert!(doc.get_array("xs").is_empty());
    }

    #[test]
    fn test_concurrent_pushes_converge() {
        let mut a = replica(1);
        let mut b = replica(2);
        a.transact(|txn| txn.array_push("opens", [3]));
        b.transact(|txn| txn.array_push("opens", [7]));
        sync(&mut a, &mut b);

        let va = a.get_array("opens").to_vec::<u32>();
        let vb = b.get_array("opens").to_vec::<u32>();
        assert_eq!(va, vb);
        assert_eq!(va.len(), 2);
        assert!(va.contains(&3) && va.contains(&7));
    }

    #[test]
    fn test_concurrent_pushes_after_shared_prefix() {
        let mut a = replica(1);
        let mut b = replica(2);
        a.transact(|txn| txn.array_push("xs", ["base"]));
        sync(&mut a, &mut b);

        a.transact(|txn| txn.array_push("xs", ["a1", "a2"]));
        b.transact(|txn| txn.array_push("xs", ["b1"]));
        sync(&mut a, &mut b);

        let va = a.get_array("xs").to_vec::<String>();
        assert_eq!(va, b.get_array("xs").to_vec::<String>());
        assert_eq!(va[0], "base");
        // each peer's run stays contiguous
        let a1 = va.iter().position(|s| s == "a1").unwrap();
        assert_eq!(va[a1 + 1], "a2");
    }

    #[test]
    fn test_concurrent_map_writes_pick_one_winner() {
        let mut a = replica(1);
        let mut b = replica(2);
        a.transact(|txn| txn.map_set("global", "status", "from-a"));
        b.transact(|txn| txn.map_set("global", "status", "from-b"));
        sync(&mut a, &mut b);

        let sa: String = a.get_map("global").get("status").unwrap();
        let sb: String = b.get_map("global").get("status").unwrap();
        assert_eq!(sa, sb);
        assert!(sa == "from-a" || sa == "from-b");
    }

    #[test]
    fn test_map_delete_and_clear() {
        let mut doc = Doc::new(1);
        doc.transact(|txn| {
            txn.map_set("m", "a", &1);
            txn.map_set("m", "b", &2);
        });
        doc.transact(|txn| txn.map_delete("m", "a"));
        assert_eq!(doc.get_map("m").keys().collect::<Vec<_>>(), vec!["b"]);
        doc.transact(|txn| txn.map_clear("m"));
        assert!(doc.get_map("m").is_empty());
    }

    #[test]
    fn test_out_of_order_delivery_waits_for_dependency() {
        let mut a = replica(1);
        a.transact(|txn| txn.array_push("xs", [1]));
        let first = Update::merge(a.take_updates()).unwrap();
        a.transact(|txn| txn.array_push("xs", [2]));
        let second = Update::merge(a.take_updates()).unwrap();

        let mut b = replica(2);
        assert!(!b.apply_update(second));
        assert!(b.get_array("xs").is_empty());
        assert!(b.apply_update(first));
        assert_eq!(b.get_array("xs").to_vec::<i32>(), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_updates_are_ignored() {
        let mut a = replica(1);
        a.transact(|txn| txn.array_push("xs", [1, 2]));
        let update = Update::merge(a.take_updates()).unwrap();

        let mut b = replica(2);
        assert!(b.apply_update(update.clone()));
        assert!(!b.apply_update(update));
        assert_eq!(b.get_array("xs").len(), 2);
    }

    #[test]
    fn test_garbage_update_is_dropped() {
        let mut doc = replica(1);
        assert!(!doc.apply_update(Update::new(vec![0xff, 0x01, 0x02])));
        assert!(doc.get_array("xs").is_empty());
    }

    #[test]
    fn test_diff_brings_late_joiner_up_to_date() {
        let mut a = replica(1);
        a.transact(|txn| {
            txn.array_push("xs", [1, 2, 3]);
            txn.map_set("m", "k", "v");
        });
        a.transact(|txn| txn.array_delete("xs", 0, 1));

        let mut late = replica(9);
        late.apply_update(a.diff(&late.state_vector()));
        assert_eq!(late.get_array("xs").to_vec::<i32>(), vec![2, 3]);
        assert_eq!(late.get_map("m").get::<String>("k").as_deref(), Some("v"));
        assert!(a.diff(&late.state_vector()).is_empty());
    }

    #[test]
    fn test_remote_event_names_changed_roots() {
        let mut a = replica(1);
        a.transact(|txn| txn.map_set("m", "k", &1));
        let update = Update::merge(a.take_updates()).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut b = replica(2);
        b.observe(move |event, _| sink.borrow_mut().push(event.clone()));
        assert!(b.apply_update(update));

        let events = seen.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].origin, Origin::Remote);
        assert!(events[0].touches("m"));
        assert!(!events[0].touches("xs"));
    }

    #[test]
    fn test_observer_fires_once_per_batch() {
        let fired = Rc::new(Cell::new(0));
        let seen = fired.clone();
        let mut doc = Doc::new(1);
        doc.observe(move |event, doc| {
            assert!(event.touches("xs"));
            assert_eq!(doc.get_array("xs").len(), 3);
            seen.set(seen.get() + 1);
        });
        doc.transact(|txn| txn.array_push("xs", [1, 2, 3]));
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_unobserve_stops_notifications() {
        let fired = Rc::new(Cell::new(0));
        let seen = fired.clone();
        let mut doc = Doc::new(1);
        let id = doc.observe(move |_, _| seen.set(seen.get() + 1));
        doc.unobserve(id);
        doc.transact(|txn| txn.map_set("m", "k", &true));
        assert_eq!(fired.get(), 0);
    }

    #[test]
    fn test_malformed_values_are_skipped() {
        let mut doc = Doc::new(1);
        doc.transact(|txn| {
            txn.array_push("xs", [serde_json::json!(1), serde_json::json!("nope")]);
        });
        assert_eq!(doc.get_array("xs").to_vec::<i32>(), vec![1]);
        let entries: Vec<Option<i32>> = doc.get_array("xs").entries().collect();
        assert_eq!(entries, vec![Some(1), None]);
    }

    #[test]
    fn test_handle_shares_one_document() {
        let handle = DocHandle::new(Doc::new(5));
        let other = handle.clone();
        handle.transact(|txn| txn.array_push("xs", [1]));
        assert_eq!(other.read(|doc| doc.get_array("xs").len()), 1);
        assert_eq!(other.take_updates().len(), 1);
    }
}
