pub mod core;
pub mod kv;
pub mod storage;
pub mod index;
pub mod query;
pub mod protocol;
pub mod psearch;
pub mod pipeline;

/*
┌──────────────────────────────────────────────────────────────────────────────┐
│                           DIRKV STRUCT ARCHITECTURE                          │
└──────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────── CORE ──────────────────────────────────────┐
│  struct Backend                                                              │
│  • config: Config                  // suffix, buckets, indexes, limits       │
│  • suffix: Dn                                                                │
│  • entries: EntryStore             // canonical records, `_parent` 2i        │
│  • changelog_entries: EntryStore   // changenumber=N, cn=changelog           │
│  • checker: ExistenceChecker       // HEAD probes, leaf checks               │
│  • indexes: IndexMaintainer        // unique / non-unique index buckets      │
│  • changelog: ChangelogWriter      // SequenceSource numbered records        │
│  • registry: Arc<PersistentSearchRegistry>                                   │
│  • fanin: FanIn                    // bounded fan-out / fan-in               │
└──────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── PIPELINES ───────────────────────────────────┐
│  Pipeline<C> = [Step { name, fn(&Backend, &mut C) -> BoxFuture<Flow> }]      │
│                                                                              │
│  add     : check_not_exists → parent_exists → assign_operational →           │
│            build_index_keys → check_unique → persist → write_indexes →       │
│            changelog → notify                                                │
│  delete  : load → check_leaf → changelog → delete_entry →                    │
│            build_index_keys → remove_indexes → notify                        │
│  modify  : load → stash → apply → delta → check_unique → merge →             │
│            remove_stale → refresh → changelog → persist → write → notify     │
│  modifyDN: load → check_leaf → new dn → check_unique → changelog →           │
│            move indexes → move record → notify                               │
│  compare, bind, search (register_persistent → execute)                       │
└──────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────────── KV ───────────────────────────────────────┐
│  trait KvStore { head, get, put(+2i), delete, list_keys, find_by_index }     │
│  HttpStore   : reqwest, round-robin urls, retry, lru response cache          │
│  MemoryStore : parking_lot RwLock<HashMap>, for tests                        │
└──────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────── QUERY ───────────────────────────────────────┐
│  parse_filter (nom) → Filter → FilterMatcher (regex substrings)              │
│                             → QueryPlanner → IndexPlan { attribute, query }  │
└──────────────────────────────────────────────────────────────────────────────┘
*/
