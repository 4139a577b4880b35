//! Binary track format (`.cyf`).
//!
//! Layout before compression, all integers big-endian:
//!
//! | Field | Type |
//! |-------|------|
//! | format version | `u16` (= 1) |
//! | geo-location count | `u32` |
//! | acceleration count | `u32` |
//! | rotation count | `u32` (always 0) |
//! | direction count | `u32` (always 0) |
//! | per geo-location | `i64` timestamp, `f64` lat, `f64` lon, `f64` speed, `i32` accuracy in cm |
//! | per acceleration | `i64` timestamp, `f64` x, `f64` y, `f64` z |
//!
//! The whole buffer is zlib-compressed. Points from all tracks are written in
//! track order.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use cyface_types::{Acceleration, GeoLocation, Measurement};

use crate::error::SerializationError;

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 2 + 4 * 4;
const LOCATION_LEN: usize = 8 * 4 + 4;
const ACCELERATION_LEN: usize = 8 * 4;

/// Points read back from a `.cyf` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    /// Format version found in the header.
    pub version: u16,
    /// Geo-locations of all tracks.
    pub locations: Vec<GeoLocation>,
    /// Accelerations of all tracks.
    pub accelerations: Vec<Acceleration>,
}

fn count(len: usize) -> Result<u32, SerializationError> {
    u32::try_from(len).map_err(|_| SerializationError::TooManyPoints(len))
}

fn accuracy_to_cm(accuracy: f64) -> Result<i32, SerializationError> {
    let cm = (accuracy * 100.0).round();
    if !cm.is_finite() || cm < 0.0 || cm > f64::from(i32::MAX) {
        return Err(SerializationError::InvalidAccuracy(accuracy));
    }
    Ok(cm as i32)
}

/// Encode a measurement and compress it.
///
/// Fails with [`SerializationError::NoLocations`] when the measurement has
/// no geo-locations.
pub fn serialize(measurement: &Measurement) -> Result<Bytes, SerializationError> {
    let location_count = measurement.location_count();
    if location_count == 0 {
        return Err(SerializationError::NoLocations(measurement.id));
    }
    let acceleration_count = measurement.acceleration_count();

    let mut buf = BytesMut::with_capacity(
        HEADER_LEN + location_count * LOCATION_LEN + acceleration_count * ACCELERATION_LEN,
    );
    buf.put_u16(FORMAT_VERSION);
    buf.put_u32(count(location_count)?);
    buf.put_u32(count(acceleration_count)?);
    buf.put_u32(0);
    buf.put_u32(0);

    for location in measurement.geo_locations() {
        buf.put_i64(location.timestamp);
        buf.put_f64(location.latitude);
        buf.put_f64(location.longitude);
        buf.put_f64(location.speed);
        buf.put_i32(accuracy_to_cm(location.accuracy)?);
    }

    for acceleration in measurement.accelerations() {
        buf.put_i64(acceleration.timestamp);
        buf.put_f64(acceleration.x);
        buf.put_f64(acceleration.y);
        buf.put_f64(acceleration.z);
    }

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(buf.len() / 2), Compression::default());
    encoder.write_all(&buf)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Decompress and decode a `.cyf` payload.
pub fn deserialize(payload: &[u8]) -> Result<DecodedPayload, SerializationError> {
    let mut raw = Vec::new();
    ZlibDecoder::new(payload).read_to_end(&mut raw)?;
    let mut buf = raw.as_slice();

    if buf.remaining() < HEADER_LEN {
        return Err(SerializationError::Truncated);
    }
    let version = buf.get_u16();
    if version != FORMAT_VERSION {
        return Err(SerializationError::UnsupportedVersion(version));
    }
    let location_count = buf.get_u32() as usize;
    let acceleration_count = buf.get_u32() as usize;
    let _rotations = buf.get_u32();
    let _directions = buf.get_u32();

    let needed = location_count
        .checked_mul(LOCATION_LEN)
        .and_then(|l| {
            acceleration_count
                .checked_mul(ACCELERATION_LEN)
                .and_then(|a| l.checked_add(a))
        })
        .ok_or(SerializationError::Truncated)?;
    if buf.remaining() < needed {
        return Err(SerializationError::Truncated);
    }

    let locations = (0..location_count)
        .map(|_| {
            let timestamp = buf.get_i64();
            let latitude = buf.get_f64();
            let longitude = buf.get_f64();
            let speed = buf.get_f64();
            let accuracy = f64::from(buf.get_i32()) / 100.0;
            GeoLocation::new(timestamp, latitude, longitude, speed, accuracy)
        })
        .collect();

    let accelerations = (0..acceleration_count)
        .map(|_| {
            let timestamp = buf.get_i64();
            Acceleration::new(timestamp, buf.get_f64(), buf.get_f64(), buf.get_f64())
        })
        .collect();

    Ok(DecodedPayload {
        version,
        locations,
        accelerations,
    })
}
