//! Caches rooms of a toy world database behind two indexes.
//!
//! Run with `RUST_LOG=gencache=debug cargo run --example room_cache` to see
//! loads, bucket retirement and the validity flush.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gencache::clock::ManualClock;
use gencache::metrics::{MetricsExporter, PrometheusTextExporter};
use gencache::traits::{Fallible, VersionCheck};
use gencache::CacheBuilder;
use parking_lot::RwLock;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq)]
struct Room {
    id: u32,
    name: String,
    exits: Vec<u32>,
}

/// Stand-in for the world database: rows plus a version bumped on every write.
#[derive(Debug, Default)]
struct WorldDb {
    rooms: RwLock<HashMap<u32, Room>>,
    version: AtomicU64,
}

impl WorldDb {
    fn seeded() -> Self {
        let db = Self::default();
        for id in 1..=20 {
            db.put(Room {
                id,
                name: format!("Room {}", id),
                exits: vec![(id % 20) + 1],
            });
        }
        db
    }

    fn put(&self, room: Room) {
        self.rooms.write().insert(room.id, room);
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    fn by_id(&self, id: &u32) -> Result<Option<Room>, String> {
        if *id == 13 {
            return Err("connection reset by peer".to_string());
        }
        Ok(self.rooms.read().get(id).cloned())
    }

    fn by_name(&self, name: &String) -> Option<Room> {
        self.rooms.read().values().find(|r| &r.name == name).cloned()
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gencache=info")),
        )
        .init();

    let db = Arc::new(WorldDb::seeded());
    let clock = ManualClock::new();

    let version_db = Arc::clone(&db);
    let cache = CacheBuilder::new(8)
        .min_age(Duration::from_secs(30))
        .max_age(Duration::from_secs(10 * 60))
        .validity(VersionCheck::new(move || {
            version_db.version.load(Ordering::SeqCst)
        }))
        .clock(Arc::new(clock.clone()))
        .build::<Room>();

    let id_db = Arc::clone(&db);
    let by_id = cache
        .add_index_with_loader(
            "RoomID",
            |r: &Room| r.id,
            Fallible(move |id: &u32| id_db.by_id(id)),
        )
        .expect("register RoomID index");
    let name_db = Arc::clone(&db);
    let by_name = cache
        .add_index_with_loader(
            "Name",
            |r: &Room| r.name.clone(),
            move |name: &String| name_db.by_name(name),
        )
        .expect("register Name index");

    // Walk the exits of a few rooms; each room is loaded once.
    for start in [1, 5, 9] {
        let mut here = by_id.get(&start).expect("lookup").expect("room exists");
        for _ in 0..3 {
            let next = here.exits[0];
            here = by_id.get(&next).expect("lookup").expect("room exists");
        }
        println!("walked from {} to {}", start, here.name);
    }

    let via_name = by_name
        .get(&"Room 2".to_string())
        .expect("lookup")
        .expect("room exists");
    let via_id = by_id.get(&2).expect("lookup").expect("room exists");
    println!(
        "Room 2 shared between indexes: {}",
        Arc::ptr_eq(&via_name, &via_id)
    );
    println!("room 13 while the database is flaky: {:?}", by_id.get(&13).expect("lookup"));

    // Let the age window pass; untouched rooms are evicted by maintenance.
    for _ in 0..12 {
        clock.advance(Duration::from_secs(60));
        by_id.get(&1).expect("lookup");
        cache.check_valid().expect("maintenance");
    }
    println!("live rooms after ten minutes: {}", cache.len().expect("len"));

    // A write to the database invalidates everything at the next time slice.
    db.put(Room {
        id: 1,
        name: "Renovated Hall".to_string(),
        exits: vec![2],
    });
    clock.advance(cache.time_slice() * 2);
    cache.check_valid().expect("maintenance");
    let renovated = by_id.get(&1).expect("lookup").expect("room exists");
    println!("room 1 after the write: {}", renovated.name);

    let exporter = PrometheusTextExporter::new("rooms_cache", std::io::stdout());
    exporter.export(&cache.metrics().expect("metrics"));
}
