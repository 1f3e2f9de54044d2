use clap::Parser;
use clap::ValueEnum;
use dense_map::Map;
use dense_map::Mode;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::SmallRng;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RemovalMode {
    Fast,
    Stable,
}

impl From<RemovalMode> for Mode {
    fn from(mode: RemovalMode) -> Self {
        match mode {
            RemovalMode::Fast => Mode::Fast,
            RemovalMode::Stable => Mode::Stable,
        }
    }
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    #[arg(short = 'm', long = "mode", value_enum, default_value_t = RemovalMode::Fast)]
    mode: RemovalMode,

    /// Percentage of entries removed, by random dense position, after filling.
    #[arg(short = 'r', long = "remove_percent", default_value_t = 50)]
    remove_percent: u8,

    #[arg(short = 's', long = "seed", default_value_t = 0)]
    seed: u64,
}

fn main() {
    let args = Args::parse();

    println!(
        "Creating {:?} map with target capacity: {}",
        args.mode, args.target_capacity
    );

    let mut map: Map<u64, u64> = Map::with_mode(args.mode.into());
    map.reserve(args.target_capacity);

    println!("Actual capacity: {}", map.capacity());
    println!("Index capacity: {}", map.index().capacity());
    println!("Filling map with u64 keys...");

    let num_values = map.index().capacity().min(map.capacity());
    for key in 0..num_values as u64 {
        if map.insert(key, key * 2).is_some() {
            panic!("Key already exists in map: {}", key);
        }
    }

    println!("Inserted {} entries into map", map.len());
    map.probe_histogram().print();
    map.debug_stats().print();

    let mut rng = SmallRng::seed_from_u64(args.seed);
    let to_remove = map.len() * usize::from(args.remove_percent.min(100)) / 100;
    for _ in 0..to_remove {
        let position = rng.random_range(0..map.len());
        let Some((key, value)) = map.remove_index(position) else {
            panic!("No entry at position {}", position);
        };
        assert_eq!(value, key * 2);
    }

    println!("Removed {} entries by random position", to_remove);
    for (key, value) in &map {
        assert_eq!(map.get(key), Some(value));
    }
    if matches!(args.mode, RemovalMode::Stable) {
        let ordered = map.keys().windows(2).all(|pair| pair[0] < pair[1]);
        println!("Insertion order preserved: {}", ordered);
    }

    map.probe_histogram().print();
    map.debug_stats().print();
}
