//! Coordinate Reference System handling

mod projection;

pub use projection::{Projection, Transformer};

use serde::{Deserialize, Serialize};
use std::fmt;

/// EPSG code of WGS84 geographic coordinates
pub const EPSG_WGS84: u32 = 4326;
/// EPSG code of Web Mercator
pub const EPSG_WEB_MERCATOR: u32 = 3857;
/// EPSG code of the global EASE-Grid 2.0 (cylindrical equal area)
pub const EPSG_EASE_GRID_2: u32 = 6933;

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// WKT representation
    wkt: Option<String>,
    /// EPSG code if known
    epsg: Option<u32>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            wkt: None,
            epsg: Some(code),
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            wkt: Some(wkt.into()),
            epsg: None,
        }
    }

    /// Parse an `EPSG:<code>` identifier (case-insensitive) or a bare code
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let code = match s.split_once(':') {
            Some((auth, code)) if auth.eq_ignore_ascii_case("epsg") => code,
            Some(_) => return None,
            None => s,
        };
        code.trim().parse().ok().map(Self::from_epsg)
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(EPSG_WGS84)
    }

    /// Web Mercator (EPSG:3857)
    pub fn web_mercator() -> Self {
        Self::from_epsg(EPSG_WEB_MERCATOR)
    }

    /// Global equal-area grid used for area measurements (EPSG:6933)
    pub fn equal_area() -> Self {
        Self::from_epsg(EPSG_EASE_GRID_2)
    }

    /// UTM zone CRS on WGS84 (EPSG:326xx / 327xx)
    pub fn utm(zone: u32, north: bool) -> Self {
        let base = if north { 32600 } else { 32700 };
        Self::from_epsg(base + zone)
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// The pure-Rust projection backing this CRS, if supported
    pub fn projection(&self) -> Option<Projection> {
        self.epsg.and_then(Projection::from_epsg)
    }

    /// Whether coordinates are longitude/latitude degrees
    pub fn is_geographic(&self) -> bool {
        matches!(self.projection(), Some(Projection::Geographic))
    }

    /// Whether planar polygon area in this CRS is true ground area.
    ///
    /// True for the equal-area grid and for UTM zones, whose scale error stays
    /// below 0.1% inside the zone.
    pub fn preserves_area(&self) -> bool {
        matches!(
            self.projection(),
            Some(Projection::EqualAreaCylindrical | Projection::Utm { .. })
        )
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }

        // Imperfect, but WKT-only CRSs come from the same reader
        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }

        false
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(wkt) = &self.wkt {
            let end = wkt
                .char_indices()
                .nth(50)
                .map(|(i, _)| i)
                .unwrap_or(wkt.len());
            return format!("WKT:{}", &wkt[..end]);
        }
        "Unknown".to_string()
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

/// Compare two optional CRSs the way grid alignment needs: both absent, or
/// both present and equivalent.
pub fn same_crs(a: Option<&CRS>, b: Option<&CRS>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.is_equivalent(b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crs_epsg() {
        let crs = CRS::from_epsg(4326);
        assert_eq!(crs.epsg(), Some(4326));
        assert_eq!(crs.identifier(), "EPSG:4326");
        assert!(crs.is_geographic());
    }

    #[test]
    fn test_crs_equivalence() {
        let a = CRS::from_epsg(4326);
        let b = CRS::wgs84();
        assert!(a.is_equivalent(&b));
        assert!(!a.is_equivalent(&CRS::web_mercator()));
        assert!(same_crs(None, None));
        assert!(!same_crs(Some(&a), None));
    }

    #[test]
    fn test_parse() {
        assert_eq!(CRS::parse("EPSG:32630"), Some(CRS::utm(30, true)));
        assert_eq!(CRS::parse("epsg:6933"), Some(CRS::equal_area()));
        assert_eq!(CRS::parse("3857"), Some(CRS::web_mercator()));
        assert_eq!(CRS::parse("ESRI:102003"), None);
        assert_eq!(CRS::parse("EPSG:abc"), None);
    }

    #[test]
    fn test_area_preservation() {
        assert!(CRS::equal_area().preserves_area());
        assert!(CRS::utm(35, false).preserves_area());
        assert!(!CRS::wgs84().preserves_area());
        assert!(!CRS::web_mercator().preserves_area());
        assert!(!CRS::from_wkt("LOCAL_CS[\"x\"]").preserves_area());
    }
}
