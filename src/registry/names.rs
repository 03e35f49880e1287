//! Well-known variable names the watchdog and polling loop rely on.

use super::VariantType;
use crate::config::TagDeclaration;

/// Heartbeat bit written by the watchdog.
pub const HEARTBEAT_SERVER: &str = "Heartbit_s";
/// Heartbeat bit mirrored back by the consumer.
pub const HEARTBEAT_CLIENT: &str = "Heartbit_c";
/// Channel liveness as inferred by the watchdog.
pub const COMMS: &str = "Comms";
/// Consumer-written capture request; > 0 means capture.
pub const SPECTRA_TRIGGER: &str = "SpectraTrigger";
/// Samples published since start; increases by one per sample and holds at `u32::MAX`.
pub const SPECTRA_COUNTER: &str = "SpectraCounter";
/// Per-pixel wavelength calibration (nm).
pub const WAVELENGTHS: &str = "Wavelengths";
/// Latest spectrum, one value per pixel.
pub const INTENSITIES: &str = "Intensities";
/// Model name of the connected device.
pub const DEVICE_MODEL: &str = "DeviceModel";
/// Serial number of the connected device.
pub const DEVICE_SERIAL: &str = "DeviceSerial";
/// Optional; published only when declared.
pub const INSTRUMENT_CONNECTED: &str = "InstrumentConnected";

/// Variables a protocol consumer may write.
pub const CONSUMER_WRITABLE: [&str; 3] = [HEARTBEAT_SERVER, HEARTBEAT_CLIENT, SPECTRA_TRIGGER];

/// Every name that must be declared at start-up, with the types it may be declared as.
pub const REQUIRED: &[(&str, &[VariantType])] = &[
    (HEARTBEAT_SERVER, &[VariantType::Boolean]),
    (HEARTBEAT_CLIENT, &[VariantType::Boolean]),
    (COMMS, &[VariantType::Boolean]),
    (SPECTRA_TRIGGER, &[VariantType::Float, VariantType::UInt32]),
    (SPECTRA_COUNTER, &[VariantType::UInt32]),
    (WAVELENGTHS, &[VariantType::FloatArray]),
    (INTENSITIES, &[VariantType::FloatArray]),
    (DEVICE_MODEL, &[VariantType::String]),
    (DEVICE_SERIAL, &[VariantType::String]),
];

/// Whether consumers may write the variable `name`.
pub fn is_consumer_writable(name: &str) -> bool {
    CONSUMER_WRITABLE.contains(&name)
}

/// Declarations for every required name, each with its first allowed type.
pub fn required_declarations() -> Vec<TagDeclaration> {
    REQUIRED
        .iter()
        .map(|(name, types)| TagDeclaration::new(*name, types[0]))
        .collect()
}
