//! Hardware debug probes via probe-rs
//!
//! One [`HardwareProbe`] type covers both supported probe families; the
//! [`ProbeFamily`] decides device filtering and access quirks. ST-Link
//! firmware rejects unaligned memory reads, so that family reports
//! `requires_aligned_access` and the sampler widens field reads to the
//! containing words.

use probe_rs::probe::list::Lister;
use probe_rs::{MemoryInterface, Permissions, Session};

use crate::error::{ProbeScopeError, Result};

use super::{DebugProbe, ProbeSettings};

/// Supported probe hardware families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFamily {
    StLink,
    JLink,
}

impl ProbeFamily {
    /// Whether this family's firmware only accepts word-aligned reads
    pub fn requires_aligned_access(&self) -> bool {
        matches!(self, ProbeFamily::StLink)
    }

    /// Match against the probe type string probe-rs reports
    fn matches(&self, probe_type: &str) -> bool {
        let lower = probe_type.to_lowercase();
        match self {
            ProbeFamily::StLink => lower.contains("st-link") || lower.contains("stlink"),
            ProbeFamily::JLink => lower.contains("j-link") || lower.contains("jlink"),
        }
    }
}

impl std::fmt::Display for ProbeFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeFamily::StLink => write!(f, "ST-Link"),
            ProbeFamily::JLink => write!(f, "J-Link"),
        }
    }
}

/// Information about a detected probe
#[derive(Debug, Clone)]
pub struct ProbeInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub probe_type: String,
}

impl std::fmt::Display for ProbeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref serial) = self.serial_number {
            write!(
                f,
                "{} ({:04x}:{:04x}) - {}",
                self.probe_type, self.vendor_id, self.product_id, serial
            )
        } else {
            write!(
                f,
                "{} ({:04x}:{:04x})",
                self.probe_type, self.vendor_id, self.product_id
            )
        }
    }
}

/// List all attached debug probes.
///
/// USB enumeration can block; call from a background thread.
pub fn list_probes() -> Vec<ProbeInfo> {
    let lister = Lister::new();
    lister
        .list_all()
        .into_iter()
        .map(|probe| ProbeInfo {
            vendor_id: probe.vendor_id,
            product_id: probe.product_id,
            serial_number: probe.serial_number.clone(),
            probe_type: probe.probe_type().to_string(),
        })
        .collect()
}

/// Open a probe of `family`, optionally selected by serial number, attach
/// to the named target over SWD and ensure the core is running.
///
/// Shared by the sampling and trace probe implementations.
pub(crate) fn open_session(family: ProbeFamily, settings: &ProbeSettings) -> Result<Session> {
    let lister = Lister::new();
    let probes = lister.list_all();

    let info = probes
        .into_iter()
        .filter(|p| family.matches(&p.probe_type().to_string()))
        .find(|p| match &settings.serial_number {
            Some(serial) => p
                .serial_number
                .as_ref()
                .map(|s| s.eq_ignore_ascii_case(serial))
                .unwrap_or(false),
            None => true,
        })
        .ok_or_else(|| {
            ProbeScopeError::Config(format!("no {family} probe found"))
        })?;

    let mut probe = info.open()?;

    tracing::debug!("setting probe speed to {} kHz", settings.speed_khz);
    if let Err(e) = probe.set_speed(settings.speed_khz) {
        tracing::warn!("failed to set probe speed: {e}");
    }
    probe.select_protocol(probe_rs::probe::WireProtocol::Swd)?;

    let target = probe_rs::config::Registry::from_builtin_families()
        .get_target_by_name(&settings.target_name)?;
    let mut session = probe.attach(target, Permissions::default())?;

    // Sampling observes a live target; resume if a previous session left it
    // halted
    {
        let mut core = session.core(0)?;
        if core.status()?.is_halted() {
            core.run()?;
        }
    }

    tracing::info!("attached to target {}", settings.target_name);
    Ok(session)
}

/// Serial numbers of attached probes belonging to `family`
pub(crate) fn devices_of(family: ProbeFamily) -> Vec<String> {
    list_probes()
        .into_iter()
        .filter(|p| family.matches(&p.probe_type))
        .filter_map(|p| p.serial_number)
        .collect()
}

/// Memory sampling over a real SWD probe
pub struct HardwareProbe {
    family: ProbeFamily,
    session: Option<Session>,
    last_error: String,
}

impl HardwareProbe {
    pub fn new(family: ProbeFamily) -> Self {
        Self {
            family,
            session: None,
            last_error: String::new(),
        }
    }

    pub fn family(&self) -> ProbeFamily {
        self.family
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session
            .as_mut()
            .ok_or_else(|| ProbeScopeError::Config("not attached to a target".into()))
    }

    fn remember<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            self.last_error = e.to_string();
        }
        result
    }
}

impl DebugProbe for HardwareProbe {
    fn start_acquisition(
        &mut self,
        settings: &ProbeSettings,
        _watch: &[(u64, usize)],
        _sample_frequency_hz: u32,
    ) -> Result<()> {
        self.stop_acquisition();
        let session = open_session(self.family, settings);
        let session = self.remember(session)?;
        self.session = Some(session);
        Ok(())
    }

    fn stop_acquisition(&mut self) {
        if self.session.take().is_some() {
            tracing::info!("detached from target");
        }
    }

    fn is_valid(&self) -> bool {
        self.session.is_some()
    }

    fn read_memory(&mut self, address: u64, buf: &mut [u8]) -> Result<()> {
        let result = (|| {
            let session = self.session_mut()?;
            let mut core = session.core(0)?;
            core.read(address, buf)
                .map_err(|e| ProbeScopeError::MemoryAccess {
                    address,
                    message: e.to_string(),
                })
        })();
        self.remember(result)
    }

    fn write_memory(&mut self, address: u64, data: &[u8]) -> Result<()> {
        let result = (|| {
            let session = self.session_mut()?;
            let mut core = session.core(0)?;
            core.write_8(address, data)
                .map_err(|e| ProbeScopeError::MemoryAccess {
                    address,
                    message: e.to_string(),
                })
        })();
        self.remember(result)
    }

    fn requires_aligned_access(&self) -> bool {
        self.family.requires_aligned_access()
    }

    fn connected_devices(&self) -> Vec<String> {
        devices_of(self.family)
    }

    fn last_error_msg(&self) -> String {
        self.last_error.clone()
    }
}

impl Drop for HardwareProbe {
    fn drop(&mut self) {
        self.stop_acquisition();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_matching() {
        assert!(ProbeFamily::StLink.matches("STLink V3"));
        assert!(ProbeFamily::StLink.matches("ST-LINK/V2"));
        assert!(!ProbeFamily::StLink.matches("J-Link Ultra"));
        assert!(ProbeFamily::JLink.matches("J-Link Ultra"));
    }

    #[test]
    fn test_alignment_quirk_per_family() {
        assert!(HardwareProbe::new(ProbeFamily::StLink).requires_aligned_access());
        assert!(!HardwareProbe::new(ProbeFamily::JLink).requires_aligned_access());
    }

    #[test]
    fn test_unattached_probe_is_invalid() {
        let mut probe = HardwareProbe::new(ProbeFamily::JLink);
        assert!(!probe.is_valid());
        let mut buf = [0u8; 4];
        assert!(probe.read_memory(0x2000_0000, &mut buf).is_err());
        assert!(!probe.last_error_msg().is_empty());
    }
}
