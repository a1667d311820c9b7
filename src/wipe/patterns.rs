//! Overwrite pass catalogs for the secure erase methods.

use rand::seq::SliceRandom;
use rand::Rng;

/// The sixteen single-byte steps 0x00, 0x11, .. 0xFF used by the Gutmann
/// catalog.
pub const SINGLE_BYTE_STEPS: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE,
    0xFF,
];

/// The six walking three-byte patterns used by the Gutmann catalog.
pub const TRIPLE_BYTE_PATTERNS: [[u8; 3]; 6] = [
    [0x92, 0x49, 0x24],
    [0x49, 0x24, 0x92],
    [0x24, 0x92, 0x49],
    [0x6D, 0xB6, 0xDB],
    [0xB6, 0xDB, 0x6D],
    [0xDB, 0x6D, 0xB6],
];

/// One overwrite pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Fill with a constant byte
    Fixed(u8),
    /// Fill with fresh random bytes
    Random,
    /// Fill with a repeating three-byte pattern
    Triple([u8; 3]),
}

/// Secure erase algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipeMethod {
    /// One pass of a constant byte
    FixedByte(u8),
    /// N passes of random data
    RandomBytes(u32),
    /// Bruce Schneier's 7-pass scheme
    BruceSchneier,
    /// DoD 5220.22-M, 3 passes
    DodBasic,
    /// DoD 5220.22-M ECE, 7 passes
    DodEce,
    /// BSI VSITR, 8 passes
    Vsitr,
    /// Gutmann floppy variant, 18 passes
    GutmannFloppy,
    /// Full Gutmann, 35 passes
    GutmannFull,
}

impl Default for WipeMethod {
    fn default() -> Self {
        WipeMethod::DodBasic
    }
}

/// Number of passes for the default random-data method.
pub const DEFAULT_RANDOM_PASSES: u32 = 10;

// Classic Gutmann catalog positions 5 through 31. Positions 1-4 and 32-35
// are the surrounding random passes.
fn gutmann_catalog_pass(position: usize) -> Pass {
    match position {
        5 => Pass::Fixed(0x55),
        6 => Pass::Fixed(0xAA),
        7..=9 => Pass::Triple(TRIPLE_BYTE_PATTERNS[position - 7]),
        10..=25 => Pass::Fixed(SINGLE_BYTE_STEPS[position - 10]),
        _ => Pass::Triple(TRIPLE_BYTE_PATTERNS[position - 26]),
    }
}

impl WipeMethod {
    /// Random-data method with the default pass count.
    pub fn random_default() -> Self {
        WipeMethod::RandomBytes(DEFAULT_RANDOM_PASSES)
    }

    /// Total number of overwrite passes, used for progress budgeting.
    pub fn pass_count(&self) -> u32 {
        match self {
            WipeMethod::FixedByte(_) => 1,
            WipeMethod::RandomBytes(n) => *n,
            WipeMethod::BruceSchneier => 7,
            WipeMethod::DodBasic => 3,
            WipeMethod::DodEce => 7,
            WipeMethod::Vsitr => 8,
            WipeMethod::GutmannFloppy => 18,
            WipeMethod::GutmannFull => 35,
        }
    }

    /// Materialize the pass sequence. The Gutmann variants shuffle their
    /// catalog section with the supplied RNG; all other methods are fixed.
    pub fn passes<R: Rng>(&self, rng: &mut R) -> Vec<Pass> {
        match self {
            WipeMethod::FixedByte(value) => vec![Pass::Fixed(*value)],
            WipeMethod::RandomBytes(n) => vec![Pass::Random; *n as usize],
            WipeMethod::BruceSchneier => {
                let mut passes = vec![Pass::Fixed(0x00), Pass::Fixed(0xFF)];
                passes.extend(vec![Pass::Random; 5]);
                passes
            }
            WipeMethod::DodBasic => vec![Pass::Fixed(0x00), Pass::Fixed(0xFF), Pass::Random],
            WipeMethod::DodEce => vec![
                Pass::Random,
                Pass::Fixed(0x55),
                Pass::Fixed(0xAA),
                Pass::Random,
                Pass::Fixed(0x00),
                Pass::Fixed(0xFF),
                Pass::Random,
            ],
            WipeMethod::Vsitr => vec![
                Pass::Fixed(0x00),
                Pass::Fixed(0xFF),
                Pass::Fixed(0x00),
                Pass::Fixed(0xFF),
                Pass::Fixed(0x00),
                Pass::Fixed(0xFF),
                Pass::Fixed(0xAA),
                Pass::Random,
            ],
            WipeMethod::GutmannFloppy => {
                // The floppy variant only uses catalog positions 5-9, each
                // twice, between the two random blocks.
                let mut catalog: Vec<Pass> = [5, 5, 6, 6, 7, 7, 8, 8, 9, 9]
                    .iter()
                    .map(|&p| gutmann_catalog_pass(p))
                    .collect();
                catalog.shuffle(rng);
                let mut passes = vec![Pass::Random; 4];
                passes.extend(catalog);
                passes.extend(vec![Pass::Random; 4]);
                passes
            }
            WipeMethod::GutmannFull => {
                let mut catalog: Vec<Pass> = (5..=31).map(gutmann_catalog_pass).collect();
                catalog.shuffle(rng);
                let mut passes = vec![Pass::Random; 4];
                passes.extend(catalog);
                passes.extend(vec![Pass::Random; 4]);
                passes
            }
        }
    }
}
