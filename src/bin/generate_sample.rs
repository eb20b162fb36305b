//! Writes a deterministic synthetic simulated/observed pair:
//! `sample_data/PlantGro.OUT` and `sample_data/SYNT0001.SBT`.
//!
//! Usage: `cargo run --bin generate_sample [output-dir]`

use std::fmt::{self, Write as _};
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

const YEAR: i32 = 2001;
const PLANTING_DOY: u32 = 100;
const SEASON_DAYS: u32 = 120;
const TREATMENTS: [(u32, &str, f64); 2] = [(1, "IRRIGATED", 1.0), (2, "RAINFED", 0.7)];

/// Logistic leaf-area curve peaking near `peak`.
fn leaf_area(das: u32, peak: f64) -> f64 {
    let t = das as f64;
    peak / (1.0 + (-(t - 45.0) / 8.0).exp()) * (1.0 - 0.6 / (1.0 + (-(t - 100.0) / 6.0).exp()))
}

/// Cumulative above-ground biomass, kg/ha.
fn biomass(das: u32, scale: f64) -> f64 {
    let t = das as f64;
    scale * 7000.0 / (1.0 + (-(t - 60.0) / 12.0).exp())
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn simulated_file() -> Result<String, fmt::Error> {
    let mut out = String::new();
    out.push_str("*DSSAT Cropping System Model Ver. 4.8.0.000 (synthetic)\n");
    for (trno, name, scale) in TREATMENTS {
        writeln!(out, "\n*RUN {trno:>3}        : {name}")?;
        out.push_str(" MODEL          : CRGRO048 - Soybean\n");
        out.push_str(" EXPERIMENT     : SYNT0001 SB SYNTHETIC SAMPLE\n");
        writeln!(out, " TREATMENT {trno:>2}   : {name}\n")?;
        out.push_str("@YEAR DOY   DAS   DAP   LAID   CWAD\n");
        for das in (0..=SEASON_DAYS).step_by(7) {
            writeln!(
                out,
                " {YEAR:4} {:3} {das:5} {das:5} {:6.2} {:6.0}",
                PLANTING_DOY + das,
                leaf_area(das, 5.0 * scale),
                biomass(das, scale)
            )?;
        }
    }
    Ok(out)
}

fn observed_file(rng: &mut SimpleRng) -> Result<String, fmt::Error> {
    let mut out = String::new();
    out.push_str("*EXP. DATA (T): SYNT0001SB SYNTHETIC SAMPLE\n\n");
    out.push_str("@TRNO DATE   LAID   CWAD\n");
    for (trno, _, scale) in TREATMENTS {
        for das in (14..=SEASON_DAYS).step_by(14) {
            let date = format!("{:02}{:03}", YEAR % 100, PLANTING_DOY + das);
            // Roughly one observation in eight was not measured.
            let laid = if rng.next_f64() < 0.125 {
                "-99".to_string()
            } else {
                format!("{:.2}", (leaf_area(das, 5.0 * scale) * rng.gauss(1.0, 0.08)).max(0.0))
            };
            let cwad = format!("{:.0}", (biomass(das, scale) * rng.gauss(1.0, 0.1)).max(0.0));
            writeln!(out, " {trno:>4} {date} {laid:>6} {cwad:>6}")?;
        }
    }
    Ok(out)
}

fn main() -> Result<()> {
    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_data"));
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut rng = SimpleRng::new(42);

    let sim_path = dir.join("PlantGro.OUT");
    fs::write(&sim_path, simulated_file()?).with_context(|| format!("Failed to write {}", sim_path.display()))?;
    println!("Wrote {}", sim_path.display());

    let obs_path = dir.join("SYNT0001.SBT");
    fs::write(&obs_path, observed_file(&mut rng)?).with_context(|| format!("Failed to write {}", obs_path.display()))?;
    println!("Wrote {}", obs_path.display());

    println!(
        "Try: cargo run -- compare --sim {} --obs {} --pooled",
        sim_path.display(),
        obs_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusty_dssat::data::loader::parse_series;
    use rusty_dssat::data::model::Source;
    use rusty_dssat::Config;

    #[test]
    fn generated_files_parse_cleanly() {
        let config = Config::default();
        let sim = parse_series("PlantGro.OUT", &simulated_file().unwrap(), Source::Simulated, &config, None);
        let obs = parse_series(
            "SYNT0001.SBT",
            &observed_file(&mut SimpleRng::new(42)).unwrap(),
            Source::Observed,
            &config,
            None,
        );
        assert!(sim.errors.is_empty(), "{:?}", sim.errors);
        assert!(obs.errors.is_empty(), "{:?}", obs.errors);
        assert_eq!(sim.tables.len(), 2);
        assert_eq!(obs.tables.len(), 2);
    }
}
