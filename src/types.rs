use std::fmt;

/// Width of one grid cell, in metres
pub const REGION_WIDTH: u32 = 256;

/// Identifies one live peer session
///
/// Handles are allocated by whoever creates the peer (typically the session manager on a
/// successful login) and must be unique for the lifetime of the process, since the relay uses
/// them to tell a superseded session's events from the current one's.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Human-entered region name, as typed before resolution
///
/// How two keys compare is decided by the resolver's [`NameMatch`](crate::NameMatch) policy,
/// not by this type.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct RegionKey(String);

impl RegionKey {
    /// Wrap a region name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name as entered
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionKey {
    fn from(x: &str) -> Self {
        Self::new(x)
    }
}

impl From<String> for RegionKey {
    fn from(x: String) -> Self {
        Self(x)
    }
}

/// Addressable form of a region: its global south-west corner packed into 64 bits
///
/// The upper 32 bits hold the global X coordinate in metres and the lower 32 bits the global Y
/// coordinate. Both are multiples of [`REGION_WIDTH`] for any handle the grid hands out.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RegionHandle(u64);

impl RegionHandle {
    /// Pack global coordinates, in metres
    pub const fn from_global(x: u32, y: u32) -> Self {
        Self((x as u64) << 32 | y as u64)
    }

    /// Pack grid cell coordinates
    ///
    /// Both coordinates must be below 2^24 so that the global coordinates fit in 32 bits.
    ///
    /// # Panics
    ///
    /// On out-of-range coordinates; use [`try_from_grid`](Self::try_from_grid) for values that
    /// were not produced locally.
    pub const fn from_grid(grid_x: u32, grid_y: u32) -> Self {
        match Self::try_from_grid(grid_x, grid_y) {
            Some(handle) => handle,
            None => panic!("grid coordinates out of range"),
        }
    }

    /// Pack grid cell coordinates, or `None` if they are out of range
    pub const fn try_from_grid(grid_x: u32, grid_y: u32) -> Option<Self> {
        match (
            grid_x.checked_mul(REGION_WIDTH),
            grid_y.checked_mul(REGION_WIDTH),
        ) {
            (Some(x), Some(y)) => Some(Self::from_global(x, y)),
            _ => None,
        }
    }

    /// Reinterpret a raw packed value
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw packed value
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// Global X coordinate of the region's origin, in metres
    pub const fn global_x(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Global Y coordinate of the region's origin, in metres
    pub const fn global_y(self) -> u32 {
        self.0 as u32
    }

    /// Grid column
    pub const fn grid_x(self) -> u32 {
        self.global_x() / REGION_WIDTH
    }

    /// Grid row
    pub const fn grid_y(self) -> u32 {
        self.global_y() / REGION_WIDTH
    }
}

impl fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.grid_x(), self.grid_y())
    }
}

/// Offset inside a region, in metres
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct LocalPosition {
    /// East offset from the region origin
    pub x: i32,
    /// North offset from the region origin
    pub y: i32,
    /// Altitude, if the user gave one
    pub z: Option<i32>,
}

impl LocalPosition {
    /// Position without an explicit altitude
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y, z: None }
    }

    /// Position with an explicit altitude
    pub const fn with_z(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z: Some(z) }
    }
}

/// A navigation request as the user entered it
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DestinationRequest {
    /// Region to travel to
    pub region: RegionKey,
    /// Where to land inside it
    pub local: LocalPosition,
}

impl DestinationRequest {
    /// Build a request for `region` at `local`
    pub fn new(region: impl Into<RegionKey>, local: LocalPosition) -> Self {
        Self {
            region: region.into(),
            local,
        }
    }
}

/// A destination whose region has been resolved
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NavigationTarget {
    /// Region name as requested
    pub region: RegionKey,
    /// Resolved region
    pub handle: RegionHandle,
    /// Landing point inside the region
    pub local: LocalPosition,
}

impl NavigationTarget {
    /// Global coordinates of the landing point, used to centre a map view
    pub fn global_position(&self) -> (i64, i64) {
        (
            i64::from(self.handle.global_x()) + i64::from(self.local.x),
            i64::from(self.handle.global_y()) + i64::from(self.local.y),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_packs_global_coordinates() {
        let handle = RegionHandle::from_grid(1000, 1001);
        assert_eq!(handle.global_x(), 256_000);
        assert_eq!(handle.global_y(), 256_256);
        assert_eq!(handle.to_raw(), (256_000u64 << 32) | 256_256);
        assert_eq!(handle.grid_x(), 1000);
        assert_eq!(handle.grid_y(), 1001);
        assert_eq!(handle.to_string(), "1000,1001");
    }

    #[test]
    fn target_global_position() {
        let target = NavigationTarget {
            region: "Ahern".into(),
            handle: RegionHandle::from_grid(997, 1002),
            local: LocalPosition::with_z(128, 64, 30),
        };
        assert_eq!(target.global_position(), (997 * 256 + 128, 1002 * 256 + 64));
    }

    #[test]
    fn grid_coordinates_must_fit() {
        let edge = (1 << 24) - 1;
        let handle = RegionHandle::try_from_grid(edge, edge).unwrap();
        assert_eq!(handle.grid_x(), edge);
        assert_eq!(handle.global_y(), edge * REGION_WIDTH);
        assert_eq!(RegionHandle::try_from_grid(1 << 24, 0), None);
        assert_eq!(RegionHandle::try_from_grid(0, u32::MAX), None);
    }

    #[test]
    #[should_panic(expected = "grid coordinates out of range")]
    fn from_grid_rejects_overflow() {
        RegionHandle::from_grid(1 << 24, 1);
    }
}
