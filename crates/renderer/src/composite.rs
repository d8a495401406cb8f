use image::RgbaImage;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CompositeError {
    #[error("no exposures to composite")]
    Empty,
    #[error("exposure {index} is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        index: usize,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("failed to allocate {width}x{height} composite")]
    Allocation { width: u32, height: u32 },
}

/// Box average of `exposures`, each channel weighted `1/N`, alpha forced
/// opaque.
///
/// Channel sums are integers and rounded once, so the result does not depend
/// on the order of the exposures.
pub fn composite(exposures: &[RgbaImage]) -> Result<RgbaImage, CompositeError> {
    let first = exposures.first().ok_or(CompositeError::Empty)?;
    let (width, height) = first.dimensions();
    for (index, exposure) in exposures.iter().enumerate() {
        if exposure.dimensions() != (width, height) {
            return Err(CompositeError::DimensionMismatch {
                index,
                expected: (width, height),
                actual: exposure.dimensions(),
            });
        }
    }

    let len = first.as_raw().len();
    let mut sums: Vec<u32> = Vec::new();
    let mut out: Vec<u8> = Vec::new();
    if sums.try_reserve_exact(len).is_err() || out.try_reserve_exact(len).is_err() {
        return Err(CompositeError::Allocation { width, height });
    }
    sums.resize(len, 0);

    for exposure in exposures {
        for (sum, &value) in sums.iter_mut().zip(exposure.as_raw()) {
            *sum += u32::from(value);
        }
    }

    let n = exposures.len() as u32;
    out.extend(sums.iter().enumerate().map(|(i, &sum)| {
        if i % 4 == 3 {
            u8::MAX
        } else {
            ((sum + n / 2) / n).min(255) as u8
        }
    }));

    RgbaImage::from_raw(width, height, out).ok_or(CompositeError::Allocation { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(value: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(3, 2, Rgba(value))
    }

    #[test]
    fn single_exposure_is_returned_opaque() {
        let exposure = RgbaImage::from_fn(3, 2, |x, y| Rgba([x as u8, y as u8, 9, 40]));
        let out = composite(std::slice::from_ref(&exposure)).unwrap();
        for (x, y, pixel) in out.enumerate_pixels() {
            let expected = exposure.get_pixel(x, y);
            assert_eq!(pixel.0[..3], expected.0[..3]);
            assert_eq!(pixel.0[3], 255);
        }
    }

    #[test]
    fn identical_exposures_average_to_themselves() {
        let color = [12, 200, 77, 255];
        let exposures = vec![solid(color); 6];
        assert_eq!(composite(&exposures).unwrap(), solid(color));
    }

    #[test]
    fn average_rounds_to_nearest() {
        let exposures = [solid([0, 255, 10, 255]), solid([1, 0, 13, 255])];
        assert_eq!(
            composite(&exposures).unwrap().get_pixel(0, 0),
            &Rgba([1, 128, 12, 255])
        );
    }

    #[test]
    fn order_does_not_matter() {
        let a = RgbaImage::from_fn(3, 2, |x, y| Rgba([x as u8 * 80, y as u8 * 3, 1, 255]));
        let b = RgbaImage::from_fn(3, 2, |x, _| Rgba([255 - x as u8, 7, 200, 255]));
        let c = solid([33, 66, 99, 255]);

        let forward = composite(&[a.clone(), b.clone(), c.clone()]).unwrap();
        let backward = composite(&[c.clone(), a.clone(), b.clone()]).unwrap();
        let shuffled = composite(&[b, c, a]).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward, shuffled);
    }

    /// Compositing is a plain box average: a lone bright frame is diluted
    /// rather than winning over darker ones.
    #[test]
    fn brighter_pixels_do_not_win() {
        let mut exposures = vec![solid([0, 0, 0, 255]); 3];
        exposures.push(solid([200, 200, 200, 255]));
        assert_eq!(
            composite(&exposures).unwrap().get_pixel(1, 1),
            &Rgba([50, 50, 50, 255])
        );
    }

    #[test]
    fn rejects_empty_and_mismatched_input() {
        assert_eq!(composite(&[]), Err(CompositeError::Empty));
        let err = composite(&[solid([0; 4]), RgbaImage::new(2, 2)]).unwrap_err();
        assert_eq!(
            err,
            CompositeError::DimensionMismatch {
                index: 1,
                expected: (3, 2),
                actual: (2, 2),
            }
        );
    }
}
