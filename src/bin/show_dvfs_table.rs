use std::{
    io::{Error as IoError, ErrorKind},
    path::Path,
    sync::Arc,
};

use mali_dvfs_governor::{Config, asv::VoltageBinSelector, sim::SimulatedGpu};

fn parse_raw(arg: &str) -> Option<u32> {
    match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16).ok(),
        None => arg.parse().ok(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments: program <asv_raw> [config]
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <asv_raw> [config_file]", args[0]);
        eprintln!("  asv_raw: raw ASV classification word (decimal or 0x-prefixed hex)");
        eprintln!(
            "  config_file: Optional path to config.toml (default: {})",
            Config::default_path().display()
        );
        eprintln!();
        eprintln!("Example: {} 0x80000002", args[0]);
        std::process::exit(1);
    }

    let raw = parse_raw(&args[1]).ok_or_else(|| {
        IoError::new(ErrorKind::InvalidInput, "asv_raw must be a valid 32-bit number")
    })?;

    let config = match args.get(2) {
        Some(path) => Config::load(Path::new(path))?,
        None => {
            let path = Config::default_path();
            if path.exists() {
                Config::load(&path)?
            } else {
                eprintln!("Warning: no config file, using the reference tables");
                Config::parse("")?
            }
        }
    };
    let table = config.governor.table;

    let gpu = Arc::new(SimulatedGpu::new().with_asv_raw(raw));
    let selector = VoltageBinSelector::new(config.governor.bin_tables, gpu);
    match selector.apply(&table) {
        Some(bin) => println!("ASV group {} tier {:#x}", bin.group, bin.tier),
        None => println!("no matching ASV table, default voltages"),
    }

    println!("step  frequency   voltage  down  up  stay");
    for step in 0..table.len() {
        let level = table.level(step);
        println!(
            "{step:>4}  {:>5} MHz  {:>7} uV  {:>3}%  {:>3}%  {:>3}",
            level.point.frequency_mhz(),
            level.point.voltage_uv(),
            level.threshold.down_percent,
            level.threshold.up_percent,
            level.stay_count,
        );
    }
    Ok(())
}
