//! Visibility-gated event emission.
//!
//! Connection lifecycle events are always recorded. Whether an operator sees
//! them at the default log level depends on the display flags: a shown event
//! is emitted at `INFO`, a hidden one at `DEBUG`.

/// How visible a lifecycle event should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Emitted at `INFO`.
    Shown,
    /// Emitted at `DEBUG`.
    Hidden,
}

impl Visibility {
    pub fn from_flag(shown: bool) -> Self {
        if shown {
            Self::Shown
        } else {
            Self::Hidden
        }
    }
}

/// Operator display flags for connection lifecycle events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayFlags {
    /// Show connect and disconnect events.
    pub show_connects: bool,
    /// Show per-tunnel byte statistics when a tunnel closes.
    pub show_statistics: bool,
}

impl DisplayFlags {
    pub fn connects(&self) -> Visibility {
        Visibility::from_flag(self.show_connects)
    }

    pub fn statistics(&self) -> Visibility {
        Visibility::from_flag(self.show_statistics)
    }
}

/// Emit a tracing event at the level selected by a [`Visibility`].
///
/// Takes the same field/message syntax as `tracing::info!`.
macro_rules! emit {
    ($visibility:expr, $($arg:tt)+) => {
        match $visibility {
            $crate::proxy::Visibility::Shown => ::tracing::info!($($arg)+),
            $crate::proxy::Visibility::Hidden => ::tracing::debug!($($arg)+),
        }
    };
}

pub(crate) use emit;

/// Format a byte count using binary units.
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;
    const TIB: u64 = GIB * 1024;

    if bytes >= TIB {
        format!("{:.2} TiB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}
