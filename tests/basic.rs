use strata::HashMap;

mod common;
use common::{with_map, ConstantState};

#[test]
fn new() {
    with_map::<usize, usize>(|map| drop(map()));
}

#[test]
fn get_empty() {
    with_map::<usize, usize>(|map| {
        let map = map();
        assert_eq!(map.get(&42), None);
        assert!(!map.contains_key(&42));
    });
}

#[test]
fn insert_read_delete() {
    with_map::<&str, i32>(|map| {
        let map = map();

        map.insert("alpha", 7).unwrap();
        assert_eq!(map.get("alpha"), Some(7));

        assert!(map.remove("alpha"));
        assert_eq!(map.get("alpha"), None);
        assert_eq!(map.len(), 0);
    });
}

#[test]
fn write_over() {
    with_map::<usize, &str>(|map| {
        let map = map();

        map.insert(42, "a").unwrap();
        map.insert(42, "b").unwrap();

        assert_eq!(map.get(&42), Some("b"));
        assert_eq!(map.len(), 1);
    });
}

#[test]
fn delete_is_idempotent() {
    with_map::<usize, usize>(|map| {
        let map = map();

        map.insert(1, 1).unwrap();
        assert!(map.remove(&1));
        assert!(!map.remove(&1));
        assert_eq!(map.get(&1), None);
        assert!(!map.remove(&2));
    });
}

#[test]
fn sequential_fill() {
    with_map::<String, usize>(|map| {
        let map = map();

        for i in 0..10_000 {
            map.insert(i.to_string(), i).unwrap();
        }

        for i in 0..10_000 {
            assert_eq!(map.get(&i.to_string()), Some(i));
        }

        assert_eq!(map.len(), 10_000);
    });
}

#[test]
fn borrowed_keys() {
    with_map::<String, usize>(|map| {
        let map = map();

        map.insert(String::from("alpha"), 1).unwrap();
        assert_eq!(map.get("alpha"), Some(1));
        assert!(map.contains_key("alpha"));
        assert!(map.remove("alpha"));
    });
}

// Every key lands in the same slot, so everything rides the overflow list.
#[test]
fn colliding_keys() {
    let map: HashMap<usize, usize, ConstantState> =
        HashMap::with_hasher(ConstantState::default()).unwrap();

    for i in 0..100 {
        map.insert(i, i * 31).unwrap();
    }

    for i in 0..100 {
        assert_eq!(map.get(&i), Some(i * 31));
    }
    assert_eq!(map.len(), 100);

    // Deleting from the middle swaps the overflow tail in.
    for i in (0..100).step_by(2) {
        assert!(map.remove(&i));
    }

    for i in 0..100 {
        assert_eq!(map.get(&i), (i % 2 == 1).then_some(i * 31));
    }
    assert_eq!(map.len(), 50);
}

// Deleting the main pair of a slot with collisions promotes the last
// collided pair.
#[test]
fn delete_promotes_overflow() {
    let map: HashMap<usize, usize, ConstantState> =
        HashMap::with_hasher(ConstantState::default()).unwrap();

    for i in 0..5 {
        map.insert(i, i).unwrap();
    }

    // Key 0 went in first and holds the main pair.
    assert!(map.remove(&0));
    for i in 1..5 {
        assert_eq!(map.get(&i), Some(i));
    }
    assert_eq!(map.len(), 4);
}

// Entries inserted before a growth are still readable, at the same values,
// after several more growths.
#[test]
fn growth_preserves_entries() {
    let map: HashMap<usize, usize> = HashMap::new().unwrap();

    // Comfortably past at least three growth boundaries on any word width.
    const ENTRIES: usize = 40_000;

    for i in 0..ENTRIES {
        map.insert(i, i + 1).unwrap();
    }

    for i in 0..ENTRIES {
        assert_eq!(map.get(&i), Some(i + 1), "key {i}");
    }
    assert_eq!(map.len(), ENTRIES);

    // And deletions keep finding them too.
    for i in (0..ENTRIES).step_by(3) {
        assert!(map.remove(&i));
    }
    assert_eq!(map.len(), ENTRIES - ENTRIES.div_ceil(3));
}

#[test]
fn presized_map_reads_back() {
    let map: HashMap<usize, usize> = HashMap::with_capacity(100_000).unwrap();

    for i in 0..50_000 {
        map.insert(i, i).unwrap();
    }
    for i in 0..50_000 {
        assert_eq!(map.get(&i), Some(i));
    }
    assert_eq!(map.len(), 50_000);
}

// Instance slots are recycled, and a recycled slot starts from an exact
// zero even on a thread that mutated the previous occupant.
#[test]
fn instance_recycling() {
    for round in 0..2_000 {
        let map: HashMap<usize, usize> = HashMap::new().unwrap();
        map.insert(round, round).unwrap();
        assert_eq!(map.len(), 1);
    }
}

#[test]
fn recycled_instance_is_empty() {
    let map: HashMap<usize, usize> = HashMap::new().unwrap();
    for i in 0..100 {
        map.insert(i, i).unwrap();
    }
    drop(map);

    let map: HashMap<usize, usize> = HashMap::new().unwrap();
    assert_eq!(map.len(), 0);
    assert!(map.is_empty());
    map.insert(1, 1).unwrap();
    assert_eq!(map.len(), 1);
}

#[test]
fn debug_format() {
    let map: HashMap<usize, &str> = HashMap::new().unwrap();
    map.insert(1, "a").unwrap();
    assert_eq!(format!("{map:?}"), r#"{1: "a"}"#);
}

#[cfg(feature = "serde")]
#[test]
fn serde_round_trip() {
    let map: HashMap<String, usize> = HashMap::new().unwrap();
    for i in 0..100 {
        map.insert(i.to_string(), i).unwrap();
    }

    let json = serde_json::to_string(&map).unwrap();
    let back: HashMap<String, usize> = serde_json::from_str(&json).unwrap();

    assert_eq!(back.len(), 100);
    for i in 0..100 {
        assert_eq!(back.get(&i.to_string()), Some(i));
    }
}
