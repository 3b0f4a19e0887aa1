// Public modules
pub mod asv;
pub mod bottom_lock;
pub mod config;
pub mod coupling;
pub mod decision;
pub mod engine;
pub mod error;
pub mod executor;
pub mod governor;
pub mod hw;
pub mod load_monitor;
pub mod sim;
pub mod status;
pub mod table;

pub use config::{Config, GovernorConfig};
pub use engine::Engine;
pub use error::{DvfsError, Result};
pub use governor::Governor;
pub use hw::Hardware;

// Reference configuration of the Exynos4 Mali-400 board
pub mod constants {
    use crate::asv::{BinTable, BinTableSet};
    use crate::table::{DvfsTable, Level, OperatingPoint, ThresholdEntry};

    pub const DEFAULT_LEVELS: usize = 4;

    // MHz, uV, (down %, up %), stay ticks
    pub const LEVELS: [(u64, u32, (u32, u32), u32); DEFAULT_LEVELS] = [
        (100, 900_000, (0, 70), 0),
        (160, 950_000, (62, 90), 0),
        (267, 1_000_000, (85, 90), 0),
        (330, 1_100_000, (85, 100), 0),
    ];

    // At or above this GPU clock the CPU is held at COUPLING_FLOOR_MHZ
    pub const COUPLING_THRESHOLD_MHZ: u32 = 300;
    pub const COUPLING_FLOOR_MHZ: u32 = 800;

    pub const DEFAULT_LOAD_SOURCE: &str = "/run/gpu-sensor/load";

    // chips supporting 1400 MHz CPU: bins S, A, B, C, D
    pub const ASV_TIER_1400: u8 = 0x8;
    pub const ASV_5_TABLE: [[u32; DEFAULT_LEVELS]; 5] = [
        [950_000, 1_000_000, 1_100_000, 1_150_000],
        [950_000, 1_000_000, 1_100_000, 1_150_000],
        [900_000, 950_000, 1_000_000, 1_100_000],
        [900_000, 950_000, 1_000_000, 1_050_000],
        [900_000, 950_000, 950_000, 1_000_000],
    ];

    // chips supporting 1200 MHz CPU: bins SS, A1, A2, B1, B2, C1, C2, D1
    pub const ASV_TIER_1200: u8 = 0x4;
    pub const ASV_8_TABLE: [[u32; DEFAULT_LEVELS]; 8] = [
        [950_000, 1_000_000, 1_100_000, 1_150_000],
        [950_000, 1_000_000, 1_100_000, 1_150_000],
        [950_000, 1_000_000, 1_100_000, 1_150_000],
        [900_000, 950_000, 1_000_000, 1_100_000],
        [900_000, 950_000, 1_000_000, 1_100_000],
        [900_000, 950_000, 1_000_000, 1_050_000],
        [900_000, 950_000, 1_000_000, 1_050_000],
        [900_000, 950_000, 950_000, 1_000_000],
    ];

    pub fn default_table() -> DvfsTable {
        let levels = LEVELS
            .iter()
            .map(|&(mhz, uv, (down, up), stay)| Level {
                point: OperatingPoint::new(mhz * 1_000_000, uv),
                threshold: ThresholdEntry::new(down, up),
                stay_count: stay,
            })
            .collect();
        // frequencies above are sorted
        DvfsTable::new(levels).unwrap_or_else(|_| unreachable!())
    }

    pub fn default_bin_tables() -> BinTableSet {
        let table = |tier, rows: &[[u32; DEFAULT_LEVELS]]| BinTable {
            tier,
            rows: rows.iter().map(|r| r.to_vec()).collect(),
        };
        BinTableSet::new(
            vec![
                table(ASV_TIER_1400, &ASV_5_TABLE[..]),
                table(ASV_TIER_1200, &ASV_8_TABLE[..]),
            ],
            DEFAULT_LEVELS,
        )
        .unwrap_or_else(|_| unreachable!())
    }
}
