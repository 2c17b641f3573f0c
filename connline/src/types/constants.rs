//! D-Bus names and numeric codes used by the supported connectivity managers.
//!
//! Each manager speaks its own dialect; the values below are the ones the
//! backends compare against or send on the wire.

/// ConnMan service, object and interface names.
pub mod connman {
    pub const SERVICE: &str = "net.connman";
    pub const MANAGER_PATH: &str = "/";
    pub const MANAGER_INTERFACE: &str = "net.connman.Manager";
    pub const SESSION_INTERFACE: &str = "net.connman.Session";

    pub const STATE_CONNECTED: &str = "connected";
    pub const STATE_ONLINE: &str = "online";
}

/// NetworkManager service, object and interface names.
pub mod nm {
    pub const SERVICE: &str = "org.freedesktop.NetworkManager";
    pub const PATH: &str = "/org/freedesktop/NetworkManager";
    pub const INTERFACE: &str = "org.freedesktop.NetworkManager";
    pub const DEVICE_INTERFACE: &str = "org.freedesktop.NetworkManager.Device";
    pub const IP4_CONFIG_INTERFACE: &str = "org.freedesktop.NetworkManager.IP4Config";
}

/// NetworkManager global state constants (`NMState`).
pub mod nm_state {
    pub const UNKNOWN: u32 = 0;
    pub const ASLEEP: u32 = 10;
    pub const DISCONNECTED: u32 = 20;
    pub const DISCONNECTING: u32 = 30;
    pub const CONNECTING: u32 = 40;
    /// Lowest state considered "connected enough" to look for a device.
    pub const CONNECTED_LOCAL: u32 = 50;
    pub const CONNECTED_SITE: u32 = 60;
    pub const CONNECTED_GLOBAL: u32 = 70;
}

/// NetworkManager device type constants.
pub mod device_type {
    pub const ETHERNET: u32 = 1;
    pub const WIFI: u32 = 2;
    pub const BLUETOOTH: u32 = 5;
    pub const WIMAX: u32 = 7;
    pub const MODEM: u32 = 8;
}

/// NetworkManager device state constants
pub mod device_state {
    pub const ACTIVATED: u32 = 100;
}

/// Wicd service, object and interface names.
pub mod wicd {
    pub const SERVICE: &str = "org.wicd.daemon";
    pub const PATH: &str = "/org/wicd/daemon";
    pub const INTERFACE: &str = "org.wicd.daemon";
}

/// Wicd connection status codes.
pub mod wicd_state {
    pub const NOT_CONNECTED: u32 = 0;
    pub const CONNECTING: u32 = 1;
    pub const WIRELESS: u32 = 2;
    pub const WIRED: u32 = 3;
    pub const SUSPENDED: u32 = 4;
}

/// Standard freedesktop interfaces.
pub mod fdo {
    pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
}

/// Keys of the property list handed to property callbacks.
pub mod property {
    pub const BEARER: &str = "bearer";
    pub const INTERFACE: &str = "interface";
    pub const ADDRESS: &str = "address";
}
