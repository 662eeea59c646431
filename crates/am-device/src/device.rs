/// A compute device as reported by a runtime.
///
/// `handle` is the runtime's own device identifier; the remaining fields are
/// what selection and buffer planning need.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor<D> {
    /// Runtime device handle.
    pub handle: D,
    /// Name of the platform the device belongs to.
    pub platform: String,
    /// Human-readable device name.
    pub name: String,
    /// Number of parallel compute units.
    pub compute_units: u32,
    /// Largest single buffer the device can allocate, in bytes.
    pub max_alloc_bytes: u64,
}

/// Picks the device with the most compute units.
///
/// Ties go to the device enumerated first. When `filter` is set, only devices
/// whose name contains it (case-insensitively) are considered. Returns the
/// index into `devices`, or `None` if nothing qualifies.
pub fn select_device<D>(devices: &[DeviceDescriptor<D>], filter: Option<&str>) -> Option<usize> {
    let filter = filter.map(str::to_lowercase);
    let mut best: Option<usize> = None;
    for (i, device) in devices.iter().enumerate() {
        if let Some(f) = &filter {
            if !device.name.to_lowercase().contains(f.as_str()) {
                continue;
            }
        }
        match best {
            Some(b) if devices[b].compute_units >= device.compute_units => {}
            _ => best = Some(i),
        }
    }
    best
}
