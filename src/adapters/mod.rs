//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements               | Connects to              |
//! |-------------|--------------------------|--------------------------|
//! | `hardware`  | ActuatorPort, InputPort  | Relay and switch GPIO    |
//! | `log_sink`  | EventSink                | Serial log output        |
//! | `nvs`       | ConfigPort, StoragePort  | NVS / in-memory store    |
//! | `time`      | ClockPort                | ESP32 timer, SNTP clock  |
//! | `ws_link`   | LinkTransport            | Coordinator WebSocket    |
//! | `wifi`      | ConnectivityPort         | ESP-IDF WiFi STA         |
//! | `device_id` |                          | eFuse MAC                |

pub mod device_id;
pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod time;
pub mod wifi;
pub mod ws_link;
