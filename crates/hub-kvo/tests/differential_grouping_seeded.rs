use std::cell::Cell;
use std::rc::Rc;

use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use hub_kvo::{ObservableObject, ObservationContext, Observer};

const KEYS: [&str; 4] = ["a", "b", "c", "d"];

fn observed_object(ctx: &ObservationContext) -> (ObservableObject, Vec<Rc<Cell<usize>>>) {
    let object = ObservableObject::new(ctx);
    let mut counts = Vec::with_capacity(KEYS.len());
    for key in KEYS {
        let count = Rc::new(Cell::new(0usize));
        let clone = Rc::clone(&count);
        let observer = Observer::new("diff", key, move |_note| {
            clone.set(clone.get() + 1);
        });
        object.add_observer(key, &observer).expect("register");
        counts.push(count);
    }
    (object, counts)
}

#[test]
fn differential_grouped_vs_ungrouped_writes_seeded() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0x00C0_FFEE);
    for round in 0..64 {
        let writes: Vec<(usize, i64)> = (0..rng.gen_range(1..24))
            .map(|_| (rng.gen_range(0..KEYS.len()), rng.gen_range(0..4)))
            .collect();

        let ctx = ObservationContext::new();
        let (grouped, grouped_counts) = observed_object(&ctx);
        let (ungrouped, ungrouped_counts) = observed_object(&ctx);

        grouped.begin_property_changes();
        for (key, value) in &writes {
            grouped.set(KEYS[*key], *value);
        }
        grouped.end_property_changes();

        for (key, value) in &writes {
            ungrouped.set(KEYS[*key], *value);
        }

        for (index, key) in KEYS.iter().enumerate() {
            assert_eq!(
                grouped.get(key),
                ungrouped.get(key),
                "round {round}: final values must converge for {key}"
            );
            let g = grouped_counts[index].get();
            let u = ungrouped_counts[index].get();
            assert!(
                g <= 1,
                "round {round}: grouped writes notify at most once for {key}, got {g}"
            );
            assert!(
                g <= u,
                "round {round}: grouping must never add notifications for {key}"
            );
            assert_eq!(
                g > 0,
                u > 0,
                "round {round}: grouped and ungrouped must agree on whether {key} changed"
            );
        }
    }
}
