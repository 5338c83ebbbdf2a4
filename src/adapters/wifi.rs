//! Station-mode WiFi with background reconnection.
//!
//! The control loop calls [`ConnectivityPort::poll`] once per tick and
//! never waits on association.  When the access point disappears the
//! adapter backs off (2 s doubling to 60 s) and retries forever; relays
//! and wall switches keep working the whole time.
//!
//! On `target_os = "espidf"` the ESP-IDF driver is used through
//! `esp_idf_svc::wifi`; elsewhere a simulated access point backs the
//! same state machine for host tests.

use core::fmt;
use log::{error, info, warn};

use crate::scheduler::{elapsed, reached};

const FIRST_RETRY_MS: u32 = 2_000;
const MAX_RETRY_MS: u32 = 60_000;
/// Association that has not completed by then counts as failed.
const ASSOCIATE_TIMEOUT_MS: u32 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiError {
    NotConfigured,
    BadCredentials(&'static str),
    Driver,
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => f.write_str("no SSID configured"),
            Self::BadCredentials(why) => write!(f, "bad credentials: {}", why),
            Self::Driver => f.write_str("WiFi driver error"),
        }
    }
}

impl std::error::Error for WifiError {}

/// Network reachability as seen by the control loop.
pub trait ConnectivityPort {
    /// Start associating.  Completion shows up through `poll`.
    fn connect(&mut self, now_ms: u32) -> Result<(), WifiError>;
    fn is_connected(&self) -> bool;
    fn poll(&mut self, now_ms: u32);
}

/// A validated SSID/passphrase pair.  An empty passphrase means an open
/// network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    ssid: heapless::String<32>,
    passphrase: heapless::String<64>,
}

impl Credentials {
    pub fn new(ssid: &str, passphrase: &str) -> Result<Self, WifiError> {
        if ssid.is_empty() || !ssid.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
            return Err(WifiError::BadCredentials("SSID must be printable ASCII"));
        }
        if !passphrase.is_empty() && passphrase.len() < 8 {
            return Err(WifiError::BadCredentials("WPA2 passphrase needs 8+ bytes"));
        }
        let mut out = Self {
            ssid: heapless::String::new(),
            passphrase: heapless::String::new(),
        };
        out.ssid
            .push_str(ssid)
            .map_err(|_| WifiError::BadCredentials("SSID longer than 32 bytes"))?;
        out.passphrase
            .push_str(passphrase)
            .map_err(|_| WifiError::BadCredentials("passphrase longer than 64 bytes"))?;
        Ok(out)
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn is_open(&self) -> bool {
        self.passphrase.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiState {
    Idle,
    Associating { since_ms: u32 },
    Online,
    Backoff { retry_at_ms: u32 },
}

pub struct WifiAdapter {
    state: WifiState,
    credentials: Option<Credentials>,
    retry_delay_ms: u32,
    #[cfg(target_os = "espidf")]
    driver: esp_idf_svc::wifi::EspWifi<'static>,
    /// Simulated access point in range.
    #[cfg(not(target_os = "espidf"))]
    ap_in_range: bool,
}

impl WifiAdapter {
    #[cfg(target_os = "espidf")]
    pub fn new(driver: esp_idf_svc::wifi::EspWifi<'static>) -> Self {
        Self {
            state: WifiState::Idle,
            credentials: None,
            retry_delay_ms: FIRST_RETRY_MS,
            driver,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn new() -> Self {
        Self {
            state: WifiState::Idle,
            credentials: None,
            retry_delay_ms: FIRST_RETRY_MS,
            ap_in_range: true,
        }
    }

    pub fn configure(&mut self, credentials: Credentials) {
        info!("WiFi: configured for '{}'", credentials.ssid());
        self.credentials = Some(credentials);
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn set_ap_in_range(&mut self, in_range: bool) {
        self.ap_in_range = in_range;
    }

    fn back_off(&mut self, now_ms: u32) {
        let delay = self.retry_delay_ms;
        self.retry_delay_ms = delay.saturating_mul(2).min(MAX_RETRY_MS);
        info!("WiFi: next attempt in {} s", delay / 1_000);
        self.state = WifiState::Backoff {
            retry_at_ms: now_ms.wrapping_add(delay),
        };
    }

    #[cfg(target_os = "espidf")]
    fn start_association(&mut self, creds: &Credentials) -> Result<(), WifiError> {
        use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};

        let config = Configuration::Client(ClientConfiguration {
            ssid: creds
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| WifiError::BadCredentials("SSID"))?,
            password: creds
                .passphrase
                .as_str()
                .try_into()
                .map_err(|_| WifiError::BadCredentials("passphrase"))?,
            auth_method: if creds.is_open() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });
        self.driver.set_configuration(&config).map_err(|_| WifiError::Driver)?;
        if !self.driver.is_started().unwrap_or(false) {
            self.driver.start().map_err(|_| WifiError::Driver)?;
        }
        self.driver.connect().map_err(|_| WifiError::Driver)
    }

    #[cfg(not(target_os = "espidf"))]
    fn start_association(&mut self, _creds: &Credentials) -> Result<(), WifiError> {
        if self.ap_in_range {
            Ok(())
        } else {
            Err(WifiError::Driver)
        }
    }

    #[cfg(target_os = "espidf")]
    fn link_up(&self) -> bool {
        self.driver.is_connected().unwrap_or(false) && self.driver.is_up().unwrap_or(false)
    }

    #[cfg(not(target_os = "espidf"))]
    fn link_up(&self) -> bool {
        self.ap_in_range
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for WifiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityPort for WifiAdapter {
    fn connect(&mut self, now_ms: u32) -> Result<(), WifiError> {
        let creds = self.credentials.clone().ok_or(WifiError::NotConfigured)?;
        info!("WiFi: associating with '{}'", creds.ssid());
        if let Err(e) = self.start_association(&creds) {
            error!("WiFi: {}", e);
            self.back_off(now_ms);
            return Err(e);
        }
        self.state = WifiState::Associating { since_ms: now_ms };
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == WifiState::Online
    }

    fn poll(&mut self, now_ms: u32) {
        match self.state {
            WifiState::Idle => {}
            WifiState::Associating { since_ms } if self.link_up() => {
                info!("WiFi: online after {} ms", elapsed(now_ms, since_ms));
                self.state = WifiState::Online;
                self.retry_delay_ms = FIRST_RETRY_MS;
            }
            WifiState::Associating { since_ms } => {
                if elapsed(now_ms, since_ms) >= ASSOCIATE_TIMEOUT_MS {
                    warn!("WiFi: association timed out");
                    self.back_off(now_ms);
                }
            }
            WifiState::Online if !self.link_up() => {
                warn!("WiFi: link lost");
                self.back_off(now_ms);
            }
            WifiState::Online => {}
            WifiState::Backoff { retry_at_ms } if reached(now_ms, retry_at_ms) => {
                let _ = self.connect(now_ms);
            }
            WifiState::Backoff { .. } => {}
        }
    }
}
