use anyhow::Result;

use rusty_telluric::correction::catalog::DEFAULT_TELLURIC_LINES;
use rusty_telluric::correction::voigt::voigt;
use rusty_telluric::data::fits::write_fits;
use rusty_telluric::data::model::MetadataValue;

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Continuum with an Hα emission line, telluric absorption and noise.
fn generate_spectrum(
    wavelength: &[f64],
    emission: (f64, f64, f64),
    telluric_depth: f64,
    noise_level: f64,
    rng: &mut SimpleRng,
) -> Vec<f64> {
    wavelength
        .iter()
        .map(|&w| {
            let continuum = 1.0 + 2e-4 * (w - 6560.0);
            let (mu, sigma, amp) = emission;
            let telluric: f64 = DEFAULT_TELLURIC_LINES
                .iter()
                .map(|&p| voigt(w, -telluric_depth, p, 0.12, 0.03))
                .sum();
            continuum + gaussian(w, mu, sigma, amp) + telluric + rng.gauss(0.0, noise_level)
        })
        .collect()
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
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
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

fn main() -> Result<()> {
    let mut rng = SimpleRng::new(42);

    // 6500 → 6650 Å covers the telluric band around Hα and the
    // 6620–6640 Å normalization window.
    let crval1 = 6500.0;
    let cdelt1 = 0.05;
    let wavelength: Vec<f64> = (0..3000).map(|i| crval1 + i as f64 * cdelt1).collect();

    let observations = [
        ("gam Cas", "2023-08-14T22:10:03", 14000, (6562.8, 1.2, 3.5)),
        ("zet Tau", "2023-11-02T01:44:51", 1000, (6562.8, 2.0, 1.4)),
    ];

    for (object, date, resolution, emission) in observations {
        let intensity = generate_spectrum(&wavelength, emission, 0.05, 0.004, &mut rng);
        let output_path = format!("sample_{}.fits", object.replace(' ', "_").to_lowercase());
        write_fits(
            output_path.as_ref(),
            &intensity,
            crval1,
            cdelt1,
            &[
                ("OBJNAME", MetadataValue::String(object.to_string())),
                ("DATE-OBS", MetadataValue::String(date.to_string())),
                ("BSS_INST", MetadataValue::String("LHIRES III 2400".to_string())),
                ("OBSERVER", MetadataValue::String("SYNTH".to_string())),
                ("BSS_ITRP", MetadataValue::Integer(resolution)),
            ],
        )?;
        println!(
            "Wrote {object} ({} samples, R = {resolution}) to {output_path}",
            wavelength.len()
        );
    }
    Ok(())
}
