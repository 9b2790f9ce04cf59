use std::io::{ErrorKind, Read};

/// Number of little-endian `f32` values in one `vpMatrix_frame<N>.bin` file.
pub const MATRIX_FLOATS: usize = 20;

const MATRIX_BYTES: usize = MATRIX_FLOATS * std::mem::size_of::<f32>();

#[derive(thiserror::Error, Debug)]
pub enum MatrixReadError {
    #[error("matrix record holds {floats_read} of 20 floats")]
    ShortRead { floats_read: usize },
    #[error("matrix record could not be read")]
    Io(#[from] std::io::Error),
}

/// Reads one matrix record into `out`.
///
/// Every complete float that is available is written to `out`, in order.
/// When the source holds fewer than [`MATRIX_FLOATS`] values, the slots past
/// the last complete float are left untouched and `ShortRead` is returned.
pub fn read_matrix_record<R: Read>(
    mut reader: R,
    out: &mut [f32; MATRIX_FLOATS],
) -> Result<(), MatrixReadError> {
    let mut bytes = [0u8; MATRIX_BYTES];
    let mut filled = 0;

    while filled < MATRIX_BYTES {
        match reader.read(&mut bytes[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let floats_read = filled / 4;

    for (slot, chunk) in out.iter_mut().zip(bytes[..floats_read * 4].chunks_exact(4)) {
        *slot = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }

    if floats_read < MATRIX_FLOATS {
        return Err(MatrixReadError::ShortRead { floats_read });
    }

    Ok(())
}

/// One camera record: five `vec4` rows.
///
/// Rows 0..4 are the view-projection matrix in row-major order, row 4 carries
/// auxiliary camera values and is passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixRecord {
    pub rows: [glam::Vec4; 5],
}

impl Default for MatrixRecord {
    fn default() -> Self {
        Self {
            rows: [glam::Vec4::ZERO; 5],
        }
    }
}

impl MatrixRecord {
    pub fn from_floats(floats: &[f32; MATRIX_FLOATS]) -> Self {
        let mut rows = [glam::Vec4::ZERO; 5];

        for (row, chunk) in rows.iter_mut().zip(floats.chunks_exact(4)) {
            *row = glam::Vec4::from_slice(chunk);
        }

        Self { rows }
    }

    pub fn view_projection(&self) -> glam::Mat4 {
        glam::Mat4::from_cols(self.rows[0], self.rows[1], self.rows[2], self.rows[3]).transpose()
    }

    #[inline]
    pub fn auxiliary(&self) -> glam::Vec4 {
        self.rows[4]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraMatrices {
    pub current: MatrixRecord,
    pub previous: MatrixRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_bytes(count: usize) -> Vec<u8> {
        (0..count)
            .flat_map(|i| (i as f32 + 0.5).to_le_bytes())
            .collect()
    }

    #[test]
    fn reads_full_record() {
        let mut out = [0.0; MATRIX_FLOATS];
        read_matrix_record(record_bytes(MATRIX_FLOATS).as_slice(), &mut out).unwrap();

        assert_eq!(out[0], 0.5);
        assert_eq!(out[19], 19.5);
    }

    #[test]
    fn extra_bytes_are_ignored() {
        let mut out = [0.0; MATRIX_FLOATS];
        read_matrix_record(record_bytes(24).as_slice(), &mut out).unwrap();

        assert_eq!(out[19], 19.5);
    }

    #[test]
    fn short_record_is_an_error_and_keeps_the_tail() {
        let mut out = [0.0; MATRIX_FLOATS];

        let err = read_matrix_record(record_bytes(7).as_slice(), &mut out).unwrap_err();

        assert!(matches!(err, MatrixReadError::ShortRead { floats_read: 7 }));
        assert_eq!(out[6], 6.5);
        assert!(out[7..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn short_record_keeps_previous_values() {
        let mut out = [-1.0; MATRIX_FLOATS];

        // a trailing partial float does not count
        let mut bytes = record_bytes(3);
        bytes.extend_from_slice(&[0xAA, 0xBB]);

        let err = read_matrix_record(bytes.as_slice(), &mut out).unwrap_err();

        assert!(matches!(err, MatrixReadError::ShortRead { floats_read: 3 }));
        assert_eq!(&out[..3], &[0.5, 1.5, 2.5]);
        assert!(out[3..].iter().all(|v| *v == -1.0));
    }

    #[test]
    fn empty_record_is_an_error() {
        let mut out = [0.0; MATRIX_FLOATS];
        let err = read_matrix_record(std::io::empty(), &mut out).unwrap_err();

        assert!(matches!(err, MatrixReadError::ShortRead { floats_read: 0 }));
    }

    #[test]
    fn record_rows_form_a_row_major_matrix() {
        let mut floats = [0.0; MATRIX_FLOATS];
        for (i, f) in floats.iter_mut().enumerate() {
            *f = i as f32;
        }

        let record = MatrixRecord::from_floats(&floats);
        let matrix = record.view_projection();

        // element (row 0, column 3) is the fourth float
        assert_eq!(matrix.col(3).x, 3.0);
        assert_eq!(matrix.col(0).y, 4.0);
        assert_eq!(record.auxiliary(), glam::Vec4::new(16.0, 17.0, 18.0, 19.0));
    }
}
