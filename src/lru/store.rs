use linked_hash_map::LinkedHashMap;

/// Returns the allocated memory in bytes.
pub trait ByteSize {
    /// Returns the amount of allocated memory in bytes.
    ///
    /// Note that most probably this is an approximation and not the exact byte value. However,
    /// it should represent the "largest" part of an instance. (E.g. for a string, this would
    /// be the bytes allocated on the heap and might discard the fields allocated on the stack
    /// used to store the length and capacity as well as the pointer itself.
    fn allocated_size(&self) -> usize;
}

impl ByteSize for String {
    fn allocated_size(&self) -> usize {
        self.capacity()
    }
}

/// Invoked for each entry which is evicted due to the memory constraints of a store.
///
/// The handler receives the evicted key along with its value. Note that it is only invoked for
/// evictions, not for explicit calls to [remove](LRUStore::remove) or [flush](LRUStore::flush).
pub type EvictionHandler<V> = Box<dyn FnMut(String, V) + Send>;

/// Provides a size constrained LRU store.
///
/// A store behaves just like a **Map** as long as there is no shortage in storage. However, once
/// the memory allocated by its keys and values grows beyond the given budget, old (least
/// recently used) entries are evicted - hence the name LRU store. A budget of **0** disables
/// eviction entirely and lets the store grow without bounds.
///
/// The store tracks its memory usage as the sum of `key.len() + value.allocated_size()` over all
/// entries. Each eviction can be observed via an [EvictionHandler](EvictionHandler).
///
/// Note that the store itself performs no synchronization at all. A [Namespace](crate::namespace::Namespace)
/// wraps its store in a mutex and fully serializes all reads and writes.
///
/// # Examples
/// ```
/// # use callisto::lru::LRUStore;
/// // Specifies a store which can allocate up to 20 bytes of memory...
/// let mut store = LRUStore::new(20);
///
/// store.put("Foo".to_owned(), "Bar".to_owned());
/// assert_eq!(store.get("Foo").unwrap(), &"Bar".to_owned());
///
/// // this will still fit..
/// store.put("Foo1".to_owned(), "Bar1".to_owned());
/// assert_eq!(store.len(), 2);
///
/// // this will exceed the memory budget and therefore evict "Foo",
/// // being the least recently used entry...
/// store.put("Foo2".to_owned(), "Bar2".to_owned());
/// assert_eq!(store.get("Foo").is_some(), false);
/// assert_eq!(store.get("Foo1").is_some(), true);
/// assert_eq!(store.get("Foo2").is_some(), true);
/// ```
pub struct LRUStore<V: ByteSize> {
    allocated_memory: usize,
    max_memory: usize,
    reads: usize,
    hits: usize,
    writes: usize,
    on_evict: Option<EvictionHandler<V>>,
    map: LinkedHashMap<String, Entry<V>>,
}

struct Entry<V: ByteSize> {
    mem_size: usize,
    value: V,
}

impl<V: ByteSize> LRUStore<V> {
    /// Creates a new store which may allocate up to **max_memory** bytes for its keys and
    /// values.
    ///
    /// Passing **0** as **max_memory** creates an unbounded store.
    pub fn new(max_memory: usize) -> Self {
        LRUStore {
            allocated_memory: 0,
            max_memory,
            reads: 0,
            hits: 0,
            writes: 0,
            on_evict: None,
            map: LinkedHashMap::new(),
        }
    }

    /// Installs a handler which is invoked once per evicted entry.
    ///
    /// # Examples
    /// ```
    /// # use callisto::lru::LRUStore;
    /// # use std::sync::{Arc, Mutex};
    /// let evicted = Arc::new(Mutex::new(Vec::new()));
    /// let log = evicted.clone();
    ///
    /// let mut store = LRUStore::new(12);
    /// store.on_evict(move |key, _value: String| log.lock().unwrap().push(key));
    ///
    /// store.put("Foo".to_owned(), "Bar".to_owned());
    /// store.put("Foo1".to_owned(), "Bar1".to_owned());
    ///
    /// assert_eq!(evicted.lock().unwrap().as_slice(), &["Foo".to_owned()]);
    /// ```
    pub fn on_evict<F>(&mut self, handler: F)
    where
        F: FnMut(String, V) + Send + 'static,
    {
        self.on_evict = Some(Box::new(handler));
    }

    /// Stores the given value for the given key.
    ///
    /// If the key is already present, its value is replaced in place and the tracked memory
    /// usage is adjusted by the size delta (which may well be negative). In both cases the
    /// entry becomes the most recently used one.
    ///
    /// Note that an entry which is larger than the whole memory budget will be evicted again
    /// by the very **put** that inserted it - the store simply enforces its constraints and
    /// ends up empty.
    pub fn put(&mut self, key: String, value: V) {
        self.writes += 1;

        let entry_size = key.len() + value.allocated_size();

        if let Some(entry) = self.map.get_refresh(&key) {
            self.allocated_memory = self.allocated_memory - entry.mem_size + entry_size;
            entry.mem_size = entry_size;
            entry.value = value;
        } else {
            let _ = self.map.insert(key, Entry {
                mem_size: entry_size,
                value,
            });
            self.allocated_memory += entry_size;
        }

        self.enforce_constraints();
    }

    fn enforce_constraints(&mut self) {
        while self.max_memory != 0 && self.allocated_memory > self.max_memory {
            self.evict_oldest();
        }
    }

    /// Evicts the least recently used entry and reports it to the eviction handler.
    fn evict_oldest(&mut self) {
        match self.map.pop_front() {
            Some((key, entry)) => {
                self.allocated_memory -= entry.mem_size;
                if let Some(handler) = self.on_evict.as_mut() {
                    handler(key, entry.value);
                }
            }
            None => unreachable!("Failed to enforce the memory constraints of an LRU store!"),
        }
    }

    /// Returns the value which has previously been stored for the given key or **None** if
    /// no value is present.
    ///
    /// A hit marks the entry as the most recently used one.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        self.reads += 1;

        match self.map.get_refresh(key) {
            Some(entry) => {
                self.hits += 1;
                Some(&entry.value)
            }
            None => None,
        }
    }

    /// Removes the entry for the given key if present.
    ///
    /// Note that the eviction handler is not invoked for an explicit removal.
    pub fn remove(&mut self, key: &str) {
        self.writes += 1;

        if let Some(entry) = self.map.remove(key) {
            self.allocated_memory -= entry.mem_size;
        }
    }

    /// Removes all entries in this store.
    ///
    /// Note that this will also zero all metrics (reads, writes, cache hits).
    pub fn flush(&mut self) {
        self.map.clear();
        self.allocated_memory = 0;
        self.reads = 0;
        self.writes = 0;
        self.hits = 0;
    }

    /// Returns the number of entries in the store.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Determines if the store is completely empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the maximal amount of memory to be (roughly) occupied by this store.
    ///
    /// A budget of **0** represents an unbounded store.
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Specifies the maximal amount of memory to be (roughly) occupied by this store.
    ///
    /// Shrinking the budget of a populated store immediately evicts entries until the
    /// constraints are fulfilled again.
    ///
    /// # Examples
    /// ```
    /// # use callisto::lru::LRUStore;
    /// let mut store = LRUStore::new(1024);
    /// store.put("Foo0".to_owned(), "Bar".to_owned());
    /// store.put("Foo1".to_owned(), "Bar".to_owned());
    /// store.put("Foo2".to_owned(), "Bar".to_owned());
    /// assert_eq!(store.len(), 3);
    ///
    /// // Now request that the store is reduced to only 14 bytes...
    /// store.set_max_memory(14);
    ///
    /// // .. this will kick each but the last two entries out of the store..
    /// assert_eq!(store.len(), 2);
    /// ```
    pub fn set_max_memory(&mut self, max_memory: usize) {
        let previous_max_memory = self.max_memory;
        self.max_memory = max_memory;
        if max_memory != 0 && (previous_max_memory == 0 || previous_max_memory > max_memory) {
            self.enforce_constraints();
        }
    }

    /// Returns the amount of memory allocated to store the data of the keys and values of this
    /// store.
    ///
    /// The returned value is in bytes. Note that this most probably a rough estimate but should
    /// account for the largest part of allocated memory.
    pub fn allocated_memory(&self) -> usize {
        self.allocated_memory
    }

    /// Returns the memory utilization in percent (always 0 for an unbounded store).
    pub fn memory_utilization(&self) -> f32 {
        match self.max_memory {
            0 => 0.,
            n => self.allocated_memory as f32 / n as f32 * 100.,
        }
    }

    /// Returns the cache hit rate in percent.
    ///
    /// Note that all metrics are reset when **flush()** is called.
    pub fn hit_rate(&self) -> f32 {
        match self.reads {
            0 => 0.,
            n => self.hits as f32 / n as f32 * 100.,
        }
    }

    /// Returns the write read ration in percent.
    ///
    /// This simply computes how many of the operations were writes. A healthy cache has way more
    /// reads than writes, therefore this might be a helpful metric.
    pub fn write_read_ratio(&self) -> f32 {
        match self.reads {
            0 => 100.,
            n => self.writes as f32 / (self.writes + n) as f32 * 100.,
        }
    }

    /// Returns the total number of reads performed on this store since the last flush.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Returns the total number of writes performed on this store since the last flush.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::lru::LRUStore;

    #[test]
    fn max_memory_is_enforced_in_lru_order() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let log = evicted.clone();

        let mut store = LRUStore::new(12 * 4);
        store.on_evict(move |key, _value: String| log.lock().unwrap().push(key));

        // We expect 4 entries with a size of 12 bytes each to fully fit in the store....
        // (Note that the allocation tracking only takes the raw string sizes into account
        // and ignores additional fields like length and the size of the underlying table /
        // vectors itself.)
        store.put("Hello0".to_owned(), "World0".to_owned());
        store.put("Hello1".to_owned(), "World1".to_owned());
        store.put("Hello2".to_owned(), "World2".to_owned());
        store.put("Hello3".to_owned(), "World3".to_owned());
        assert_eq!(store.len(), 4);
        assert_eq!(store.allocated_memory(), 12 * 4);
        assert_eq!(evicted.lock().unwrap().len(), 0);

        // Touch "Hello0" so that "Hello1" becomes the least recently used entry...
        assert_eq!(store.get("Hello0").unwrap(), &"World0".to_owned());

        // ...and overflow the budget: "Hello1" and only "Hello1" has to go.
        store.put("Hello4".to_owned(), "World4".to_owned());
        assert_eq!(store.len(), 4);
        assert_eq!(store.allocated_memory(), 12 * 4);
        assert_eq!(store.get("Hello1"), None);
        assert_eq!(evicted.lock().unwrap().as_slice(), &["Hello1".to_owned()]);

        // Overflowing it again drops "Hello2", the next one in touch order...
        store.put("Hello5".to_owned(), "World5".to_owned());
        assert_eq!(
            evicted.lock().unwrap().as_slice(),
            &["Hello1".to_owned(), "Hello2".to_owned()]
        );
    }

    #[test]
    fn replacing_a_value_adjusts_usage_by_the_delta() {
        let mut store = LRUStore::new(1024);

        store.put("Hello0".to_owned(), "World0".to_owned());
        store.put("Hello1".to_owned(), "World1".to_owned());
        assert_eq!(store.allocated_memory(), 12 * 2);

        // If we replace an entry with a shorter value, the used memory shrinks by the
        // delta and the entry count remains untouched...
        store.put("Hello1".to_owned(), "".to_owned());
        assert_eq!(store.allocated_memory(), 12 + 6);
        assert_eq!(store.len(), 2);

        // ...same for a longer value.
        store.put("Hello1".to_owned(), "World11".to_owned());
        assert_eq!(store.allocated_memory(), 12 + 13);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn replacing_a_value_marks_the_entry_as_recently_used() {
        let mut store = LRUStore::new(12 * 2);

        store.put("Hello0".to_owned(), "World0".to_owned());
        store.put("Hello1".to_owned(), "World1".to_owned());

        // Updating "Hello0" moves it to the most recently used position...
        store.put("Hello0".to_owned(), "Again0".to_owned());

        // ...therefore the next eviction hits "Hello1".
        store.put("Hello2".to_owned(), "World2".to_owned());
        assert_eq!(store.get("Hello0").is_some(), true);
        assert_eq!(store.get("Hello1"), None);
    }

    #[test]
    fn a_zero_budget_disables_eviction() {
        let mut store = LRUStore::new(0);

        for index in 0..1000 {
            store.put(format!("Hello{}", index), "World".to_owned());
        }

        assert_eq!(store.len(), 1000);
    }

    #[test]
    fn an_oversized_entry_leaves_an_empty_store() {
        let mut store = LRUStore::new(8);

        store.put("Hello".to_owned(), "An entry way beyond the budget".to_owned());
        assert_eq!(store.len(), 0);
        assert_eq!(store.allocated_memory(), 0);
    }

    #[test]
    fn removal_corrects_usage_without_invoking_the_eviction_handler() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let log = evicted.clone();

        let mut store = LRUStore::new(1024);
        store.on_evict(move |key, _value: String| log.lock().unwrap().push(key));

        store.put("Hello0".to_owned(), "World0".to_owned());
        store.put("Hello1".to_owned(), "World1".to_owned());
        store.remove("Hello0");

        assert_eq!(store.len(), 1);
        assert_eq!(store.allocated_memory(), 12);
        assert_eq!(evicted.lock().unwrap().len(), 0);

        // Removing an unknown key changes nothing...
        store.remove("Unknown");
        assert_eq!(store.allocated_memory(), 12);
    }

    #[test]
    fn metrics_are_computed_correctly() {
        let mut store = LRUStore::new(1024);

        // Write 3 values into the store...
        store.put("A".to_owned(), "A".to_owned());
        store.put("B".to_owned(), "B".to_owned());
        store.put("C".to_owned(), "C".to_owned());

        // Perform 4 reads, of which 3 hit an entry...
        assert_eq!(store.get("A").is_some(), true);
        assert_eq!(store.get("B").is_some(), true);
        assert_eq!(store.get("C").is_some(), true);
        assert_eq!(store.get("D").is_none(), true);

        // ... therefore we had 3 writes, 4 reads of which 3 hit a value which
        // yields a hit rate of 75%
        assert_eq!(store.writes(), 3);
        assert_eq!(store.reads(), 4);
        assert_eq!(store.hit_rate().round() as i32, 75);

        // Once flushed, the store and its metrics are back at zero...
        store.flush();
        assert_eq!(store.len(), 0);
        assert_eq!(store.reads(), 0);
        assert_eq!(store.writes(), 0);
        assert_eq!(store.allocated_memory(), 0);
    }
}
