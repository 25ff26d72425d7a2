//! Web Mercator (EPSG:3857) and WGS84 (EPSG:4326) conversion.
//!
//! Sessions work in Web Mercator map coordinates; the transfer format and the
//! geodetic calculations use longitude/latitude in degrees.

use kurbo::Point;

/// WGS84 semi-major axis, also the radius of the Web Mercator sphere.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude limit of the Web Mercator projection.
const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Project longitude/latitude (`x` = lon, `y` = lat) to Web Mercator meters.
pub fn from_lon_lat(lon_lat: Point) -> Point {
    let lat = lon_lat.y.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    Point::new(
        EARTH_RADIUS * lon_lat.x.to_radians(),
        EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln(),
    )
}

/// Unproject Web Mercator meters to longitude/latitude.
pub fn to_lon_lat(point: Point) -> Point {
    let lon = (point.x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (point.y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    Point::new(lon, lat)
}
