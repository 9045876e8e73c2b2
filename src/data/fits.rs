use std::path::Path;

use anyhow::{bail, Context, Result};
use fitsio::hdu::HduInfo;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;

use super::model::{LoadedSpectrum, MetadataValue, Spectrum, SpectrumHeader};

/// Header keys carried into [`SpectrumHeader`], in display order.
pub const HEADER_KEYS: &[&str] = &[
    "OBJNAME", "OBJECT", "DATE-OBS", "BSS_INST", "OBSERVER", "BSS_ITRP", "TELESCOP", "EXPTIME",
    "CRVAL1", "CDELT1", "CRPIX1", "CUNIT1",
];

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Load a 1D spectrum from the primary HDU of a FITS file.
///
/// The wavelength axis comes from the linear WCS keywords:
/// `λ[i] = CRVAL1 + (i + 1 - CRPIX1) * CDELT1`, with `CRPIX1` defaulting to 1.
/// cfitsio applies `BSCALE`/`BZERO` to the data.
pub fn read_fits(path: &Path) -> Result<LoadedSpectrum> {
    let mut fits = FitsFile::open(path).with_context(|| format!("opening {}", path.display()))?;
    let hdu = fits
        .primary_hdu()
        .with_context(|| format!("reading primary HDU of {}", path.display()))?;

    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => shape.clone(),
        _ => bail!("primary HDU of {} is not an image", path.display()),
    };
    if shape.is_empty() {
        bail!("primary HDU holds no data array");
    }
    if shape.iter().filter(|&&len| len > 1).count() > 1 {
        bail!("expected a 1D spectrum, found image shape {shape:?}");
    }
    let n = shape
        .iter()
        .try_fold(1usize, |acc, &len| acc.checked_mul(len))
        .context("image dimensions overflow")?;
    if n == 0 {
        bail!("primary HDU holds no samples");
    }
    // Every sample takes at least one byte, so a header claiming more samples
    // than the file has bytes is corrupt; reject it before allocating.
    let file_len = std::fs::metadata(path)
        .with_context(|| format!("reading metadata of {}", path.display()))?
        .len();
    if n as u64 > file_len {
        bail!("header claims {n} samples but the file holds only {file_len} bytes");
    }

    let intensity: Vec<f64> = hdu
        .read_image(&mut fits)
        .with_context(|| format!("reading data array of {}", path.display()))?;
    if intensity.len() != n {
        bail!(
            "data array has {} samples, header declares {n}",
            intensity.len()
        );
    }

    let crval1: f64 = hdu
        .read_key(&mut fits, "CRVAL1")
        .context("missing CRVAL1")?;
    let cdelt1: f64 = hdu
        .read_key(&mut fits, "CDELT1")
        .context("missing CDELT1")?;
    let crpix1: f64 = hdu.read_key(&mut fits, "CRPIX1").unwrap_or(1.0);
    let wavelength = (0..n)
        .map(|i| crval1 + (i as f64 + 1.0 - crpix1) * cdelt1)
        .collect();

    let mut header = SpectrumHeader::default();
    for &key in HEADER_KEYS {
        if let Some(value) = read_header_value(&hdu, &mut fits, key) {
            header.insert(key, value);
        }
    }

    Ok(LoadedSpectrum {
        spectrum: Spectrum::new(wavelength, intensity),
        header,
    })
}

fn read_header_value(
    hdu: &fitsio::hdu::FitsHdu,
    fits: &mut FitsFile,
    key: &str,
) -> Option<MetadataValue> {
    if let Ok(text) = hdu.read_key::<String>(fits, key) {
        return Some(classify_value(&text));
    }
    if let Ok(i) = hdu.read_key::<i64>(fits, key) {
        return Some(MetadataValue::Integer(i));
    }
    hdu.read_key::<f64>(fits, key).ok().map(MetadataValue::Float)
}

/// Type a keyword value from its text: integers, then reals (`D` exponents
/// included), then the logical `T`/`F`; anything else is a string.
fn classify_value(text: &str) -> MetadataValue {
    let value = text.trim();
    if value.is_empty() {
        return MetadataValue::Null;
    }
    if let Ok(i) = value.parse::<i64>() {
        return MetadataValue::Integer(i);
    }
    if let Ok(f) = value.replace(['D', 'd'], "E").parse::<f64>() {
        if f.is_finite() {
            return MetadataValue::Float(f);
        }
    }
    match value {
        "T" => MetadataValue::Bool(true),
        "F" => MetadataValue::Bool(false),
        _ => MetadataValue::String(value.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write a 1D double-precision spectrum with a linear wavelength axis.
/// `cards` are written after the WCS keywords; an existing file is replaced.
pub fn write_fits(
    path: &Path,
    intensity: &[f64],
    crval1: f64,
    cdelt1: f64,
    cards: &[(&str, MetadataValue)],
) -> Result<()> {
    if intensity.is_empty() {
        bail!("refusing to write an empty spectrum to {}", path.display());
    }
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &[intensity.len()],
    };
    let mut fits = FitsFile::create(path)
        .with_custom_primary(&description)
        .overwrite()
        .open()
        .with_context(|| format!("creating {}", path.display()))?;
    let hdu = fits.primary_hdu()?;

    hdu.write_image(&mut fits, intensity)
        .with_context(|| format!("writing data array to {}", path.display()))?;
    hdu.write_key(&mut fits, "CRVAL1", crval1)?;
    hdu.write_key(&mut fits, "CDELT1", cdelt1)?;
    hdu.write_key(&mut fits, "CRPIX1", 1.0f64)?;

    for (key, value) in cards {
        match value {
            MetadataValue::String(s) => hdu.write_key(&mut fits, key, s.as_str())?,
            MetadataValue::Integer(i) => hdu.write_key(&mut fits, key, *i)?,
            MetadataValue::Float(f) => hdu.write_key(&mut fits, key, *f)?,
            MetadataValue::Bool(b) => hdu.write_key(&mut fits, key, if *b { "T" } else { "F" })?,
            MetadataValue::Null => continue,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    /// Hand-assembled header, each card padded to 80 columns and the block
    /// to 2880 bytes.
    fn raw_header(cards: &[&str]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for card in cards.iter().chain(std::iter::once(&"END")) {
            bytes.extend_from_slice(format!("{card:<80}").as_bytes());
        }
        bytes.resize(bytes.len().div_ceil(2880) * 2880, b' ');
        bytes
    }

    #[test]
    fn written_spectrum_reads_back_with_header_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hd5394.fits");
        write_fits(
            &path,
            &[1.0, 2.5, 3.0],
            6500.0,
            0.25,
            &[
                ("OBJNAME", MetadataValue::String("HD 5394".into())),
                ("BSS_ITRP", MetadataValue::Integer(9000)),
            ],
        )
        .unwrap();

        let loaded = read_fits(&path).unwrap();
        assert_eq!(loaded.spectrum.intensity, vec![1.0, 2.5, 3.0]);
        assert_relative_eq!(loaded.spectrum.wavelength[0], 6500.0, epsilon = 1e-6);
        assert_relative_eq!(loaded.spectrum.wavelength[2], 6500.5, epsilon = 1e-6);
        assert_eq!(
            loaded.header.get("OBJNAME"),
            Some(&MetadataValue::String("HD 5394".into()))
        );
        assert_eq!(loaded.info().resolution, Some(9000));
    }

    #[test]
    fn applies_bscale_bzero_to_integer_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scaled.fits");
        let mut bytes = raw_header(&[
            "SIMPLE  =                    T",
            "BITPIX  =                   16",
            "NAXIS   =                    1",
            "NAXIS1  =                    2",
            "BZERO   =                100.0",
            "BSCALE  =                  0.5",
            "CRVAL1  =               6000.0",
            "CDELT1  =                  1.0",
        ]);
        bytes.extend_from_slice(&10i16.to_be_bytes());
        bytes.extend_from_slice(&(-4i16).to_be_bytes());
        bytes.resize(2 * 2880, 0);
        std::fs::write(&path, bytes).unwrap();

        let loaded = read_fits(&path).unwrap();
        assert_eq!(loaded.spectrum.intensity, vec![105.0, 98.0]);
        assert_eq!(loaded.spectrum.wavelength, vec![6000.0, 6001.0]);
    }

    #[test]
    fn oversized_axis_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.fits");
        let bytes = raw_header(&[
            "SIMPLE  =                    T",
            "BITPIX  =                  -64",
            "NAXIS   =                    1",
            "NAXIS1  =  2305843009213693952",
            "CRVAL1  =               6000.0",
            "CDELT1  =                  1.0",
        ]);
        std::fs::write(&path, bytes).unwrap();
        assert!(read_fits(&path).is_err());
    }

    #[test]
    fn image_and_garbage_files_are_errors() {
        let dir = TempDir::new().unwrap();

        let image = dir.path().join("image.fits");
        let description = ImageDescription {
            data_type: ImageType::Double,
            dimensions: &[3, 4],
        };
        let mut fits = FitsFile::create(&image)
            .with_custom_primary(&description)
            .open()
            .unwrap();
        let hdu = fits.primary_hdu().unwrap();
        hdu.write_image(&mut fits, &[0.0f64; 12]).unwrap();
        drop(fits);
        assert!(read_fits(&image).is_err());

        let garbage = dir.path().join("garbage.fits");
        std::fs::write(&garbage, b"not a FITS file").unwrap();
        assert!(read_fits(&garbage).is_err());
    }

    #[test]
    fn keyword_text_is_typed() {
        assert_eq!(classify_value("14000"), MetadataValue::Integer(14000));
        assert_eq!(classify_value("1.5D2"), MetadataValue::Float(150.0));
        assert_eq!(classify_value("T"), MetadataValue::Bool(true));
        assert_eq!(
            classify_value("LHIRES III "),
            MetadataValue::String("LHIRES III".into())
        );
        assert_eq!(classify_value("  "), MetadataValue::Null);
    }
}
