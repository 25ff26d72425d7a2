//! KML transfer format.
//!
//! One `Placemark` per feature, coordinates in WGS84 longitude/latitude,
//! tool metadata in `ExtendedData`. An empty collection is written as
//! [`EMPTY_CONTENT`].

use crate::feature::{Feature, FeatureColor, FeatureId, FeatureStyle};
use crate::geometry::Geometry;
use crate::kind::DrawKind;
use crate::projection::{from_lon_lat, to_lon_lat};
use kurbo::Point;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content persisted for a collection without features.
pub const EMPTY_CONTENT: &str = r#"<kml xmlns="http://www.opengis.net/kml/2.2"><Document/></kml>"#;

const KML_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";
const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const LINE_WIDTH: f64 = 3.0;
/// Fill opacity of polygons.
const FILL_ALPHA: u8 = 0x66;

const DATA_TYPE: &str = "type";
const DATA_DISPLAY_RULER: &str = "displayruler";

/// KML errors.
#[derive(Debug, Error)]
pub enum KmlError {
    #[error("XML error: {0}")]
    Xml(String),
    #[error("Invalid coordinates: {0}")]
    Coordinates(String),
    #[error("Invalid geometry in placemark {0}")]
    Geometry(String),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "kml")]
struct Kml {
    #[serde(rename = "@xmlns", default)]
    xmlns: String,
    #[serde(rename = "Document", default)]
    document: Document,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "Placemark", default)]
    placemarks: Vec<Placemark>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Placemark {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "Style", default, skip_serializing_if = "Option::is_none")]
    style: Option<Style>,
    #[serde(rename = "ExtendedData", default, skip_serializing_if = "Option::is_none")]
    extended_data: Option<ExtendedData>,
    #[serde(rename = "Point", default, skip_serializing_if = "Option::is_none")]
    point: Option<Coordinates>,
    #[serde(rename = "LineString", default, skip_serializing_if = "Option::is_none")]
    line_string: Option<Coordinates>,
    #[serde(rename = "Polygon", default, skip_serializing_if = "Option::is_none")]
    polygon: Option<Polygon>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Style {
    #[serde(rename = "IconStyle", default, skip_serializing_if = "Option::is_none")]
    icon: Option<IconStyle>,
    #[serde(rename = "LabelStyle", default, skip_serializing_if = "Option::is_none")]
    label: Option<ColorStyle>,
    #[serde(rename = "LineStyle", default, skip_serializing_if = "Option::is_none")]
    line: Option<ColorStyle>,
    #[serde(rename = "PolyStyle", default, skip_serializing_if = "Option::is_none")]
    poly: Option<ColorStyle>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IconStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scale: Option<f64>,
    #[serde(rename = "Icon", default, skip_serializing_if = "Option::is_none")]
    icon: Option<Icon>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Icon {
    href: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ColorStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    width: Option<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ExtendedData {
    #[serde(rename = "Data", default)]
    data: Vec<Data>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Data {
    #[serde(rename = "@name")]
    name: String,
    value: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Coordinates {
    coordinates: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Polygon {
    #[serde(rename = "outerBoundaryIs")]
    outer: OuterBoundary,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OuterBoundary {
    #[serde(rename = "LinearRing")]
    ring: Coordinates,
}

/// Serialize features given in map coordinates.
pub fn write_kml(features: &[&Feature]) -> Result<String, KmlError> {
    if features.is_empty() {
        return Ok(EMPTY_CONTENT.to_string());
    }
    let kml = Kml {
        xmlns: KML_NAMESPACE.to_string(),
        document: Document {
            name: None,
            placemarks: features.iter().map(|feature| to_placemark(feature)).collect(),
        },
    };
    let body = quick_xml::se::to_string(&kml).map_err(|e| KmlError::Xml(e.to_string()))?;
    Ok(format!("{XML_DECLARATION}{body}"))
}

/// Parse KML into features in map coordinates.
pub fn read_kml(content: &str) -> Result<Vec<Feature>, KmlError> {
    if content.trim() == EMPTY_CONTENT {
        return Ok(Vec::new());
    }
    let kml: Kml = quick_xml::de::from_str(content).map_err(|e| KmlError::Xml(e.to_string()))?;
    kml.document
        .placemarks
        .into_iter()
        .enumerate()
        .map(|(index, placemark)| from_placemark(placemark, index))
        .collect()
}

fn format_coordinates(points: &[Point]) -> String {
    points
        .iter()
        .map(|p| {
            let lon_lat = to_lon_lat(*p);
            format!("{},{}", lon_lat.x, lon_lat.y)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_coordinates(text: &str) -> Result<Vec<Point>, KmlError> {
    text.split_whitespace()
        .map(|tuple| {
            let mut parts = tuple.split(',').map(str::parse::<f64>);
            match (parts.next(), parts.next()) {
                (Some(Ok(lon)), Some(Ok(lat))) => Ok(from_lon_lat(Point::new(lon, lat))),
                _ => Err(KmlError::Coordinates(tuple.to_string())),
            }
        })
        .collect()
}

fn to_placemark(feature: &Feature) -> Placemark {
    let mut placemark = Placemark {
        id: Some(feature.id.to_string()),
        description: feature.description.clone(),
        ..Placemark::default()
    };

    match &feature.geometry {
        Geometry::Point(p) => {
            placemark.point = Some(Coordinates {
                coordinates: format_coordinates(std::slice::from_ref(p)),
            });
        }
        Geometry::LineString(points) => {
            placemark.line_string = Some(Coordinates {
                coordinates: format_coordinates(points),
            });
        }
        Geometry::Polygon(ring) => {
            let mut closed = ring.clone();
            if let Some(&first) = ring.first() {
                if ring.last() != Some(&first) {
                    closed.push(first);
                }
            }
            placemark.polygon = Some(Polygon {
                outer: OuterBoundary {
                    ring: Coordinates {
                        coordinates: format_coordinates(&closed),
                    },
                },
            });
        }
    }

    let style = &feature.style;
    let color = style.color.map(|c| c.to_kml());
    let mut kml_style = Style::default();
    match feature.kind {
        Some(DrawKind::Marker) => {
            kml_style.icon = Some(IconStyle {
                color: color.clone(),
                scale: style.scale,
                icon: style.symbol_src.clone().map(|href| Icon { href }),
            });
        }
        Some(DrawKind::Text) => {
            placemark.name = style.text.clone();
            kml_style.label = Some(ColorStyle {
                color: color.clone(),
                scale: style.scale,
                width: None,
            });
        }
        _ => {
            kml_style.line = Some(ColorStyle {
                color: color.clone(),
                scale: None,
                width: Some(LINE_WIDTH),
            });
            if matches!(feature.geometry, Geometry::Polygon(_)) {
                kml_style.poly = Some(ColorStyle {
                    color: style.color.map(|c| c.with_alpha(FILL_ALPHA).to_kml()),
                    scale: None,
                    width: None,
                });
            }
        }
    }
    placemark.style = Some(kml_style);

    let mut data = Vec::new();
    if let Some(kind) = feature.kind {
        data.push(Data {
            name: DATA_TYPE.to_string(),
            value: kind.as_str().to_string(),
        });
    }
    if let Some(display) = feature.display_ruler {
        data.push(Data {
            name: DATA_DISPLAY_RULER.to_string(),
            value: display.to_string(),
        });
    }
    if !data.is_empty() {
        placemark.extended_data = Some(ExtendedData { data });
    }
    placemark
}

fn data_value<'a>(data: &'a [Data], name: &str) -> Option<&'a str> {
    data.iter().find(|d| d.name == name).map(|d| d.value.trim())
}

fn from_placemark(placemark: Placemark, index: usize) -> Result<Feature, KmlError> {
    let id = placemark
        .id
        .map(FeatureId::from)
        .unwrap_or_else(|| FeatureId::from(format!("placemark_{index}")));

    let geometry = if let Some(point) = &placemark.point {
        let points = parse_coordinates(&point.coordinates)?;
        Geometry::Point(*points.first().ok_or_else(|| KmlError::Geometry(id.to_string()))?)
    } else if let Some(line) = &placemark.line_string {
        Geometry::LineString(parse_coordinates(&line.coordinates)?)
    } else if let Some(polygon) = &placemark.polygon {
        let mut ring = parse_coordinates(&polygon.outer.ring.coordinates)?;
        if ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        Geometry::Polygon(ring)
    } else {
        return Err(KmlError::Geometry(id.to_string()));
    };

    let data = placemark.extended_data.map(|e| e.data).unwrap_or_default();

    let mut feature = Feature::new(id, geometry);
    if let Some(kind) = data_value(&data, DATA_TYPE).and_then(|v| v.parse::<DrawKind>().ok()) {
        feature.kind = Some(kind);
    }
    feature.display_ruler = data_value(&data, DATA_DISPLAY_RULER).and_then(|v| v.parse().ok());
    feature.description = placemark.description;

    let style = placemark.style.unwrap_or_default();
    let color_of = |s: Option<&String>| s.and_then(|c| FeatureColor::from_kml(c));
    feature.style = match feature.kind {
        Some(DrawKind::Marker) => {
            let icon = style.icon.unwrap_or_default();
            FeatureStyle {
                symbol_src: icon.icon.map(|i| i.href),
                scale: icon.scale,
                color: color_of(icon.color.as_ref()),
                text: None,
            }
        }
        Some(DrawKind::Text) => {
            let label = style.label.unwrap_or_default();
            FeatureStyle {
                symbol_src: None,
                scale: label.scale,
                color: color_of(label.color.as_ref()),
                text: placemark.name,
            }
        }
        _ => FeatureStyle {
            color: color_of(style.line.as_ref().and_then(|l| l.color.as_ref()))
                .or_else(|| color_of(style.poly.as_ref().and_then(|p| p.color.as_ref())).map(|c| c.with_alpha(0xff))),
            ..FeatureStyle::default()
        },
    };
    Ok(feature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::StyleOption;

    fn sample() -> Vec<Feature> {
        let style = StyleOption {
            symbol_src: Some("https://example.com/pin.png".to_string()),
            scale: 1.5,
            color: FeatureColor::new(0x12, 0x34, 0x56, 0xff),
            text: Some("Summit & hut".to_string()),
        };
        let bern = from_lon_lat(Point::new(7.44, 46.95));
        let thun = from_lon_lat(Point::new(7.63, 46.75));
        let spiez = from_lon_lat(Point::new(7.68, 46.69));

        let mut marker = Feature::new(FeatureId::from("draw_marker_1"), Geometry::Point(bern));
        marker.style = DrawKind::Marker.style_for(&style);
        let mut text = Feature::new(FeatureId::from("draw_text_2"), Geometry::Point(thun));
        text.style = DrawKind::Text.style_for(&style);
        let mut line = Feature::new(FeatureId::from("draw_line_3"), Geometry::LineString(vec![bern, thun]));
        line.style = DrawKind::Line.style_for(&style);
        line.description = Some("<b>route</b>".to_string());
        let mut measure = Feature::new(
            FeatureId::from("measure_measure_4"),
            Geometry::Polygon(vec![bern, thun, spiez]),
        );
        measure.style = DrawKind::Measure.style_for(&style);
        measure.display_ruler = Some(false);
        vec![marker, text, line, measure]
    }

    fn assert_close(a: &Geometry, b: &Geometry) {
        assert_eq!(a.geometry_type(), b.geometry_type());
        assert_eq!(a.coordinates().len(), b.coordinates().len());
        for (p, q) in a.coordinates().iter().zip(b.coordinates()) {
            assert!(p.distance(*q) < 1e-6, "{p:?} != {q:?}");
        }
    }

    #[test]
    fn test_empty_collection_is_sentinel() {
        assert_eq!(write_kml(&[]).unwrap(), EMPTY_CONTENT);
        assert!(read_kml(EMPTY_CONTENT).unwrap().is_empty());
    }

    #[test]
    fn test_round_trip() {
        let features = sample();
        let refs: Vec<&Feature> = features.iter().collect();
        let content = write_kml(&refs).unwrap();
        assert!(content.contains("<Placemark id=\"draw_marker_1\">"));
        assert!(content.contains("<color>ff563412</color>"));

        let read = read_kml(&content).unwrap();
        assert_eq!(read.len(), features.len());
        for (original, parsed) in features.iter().zip(&read) {
            assert_eq!(original.id, parsed.id);
            assert_eq!(original.kind, parsed.kind);
            assert_eq!(original.style, parsed.style);
            assert_eq!(original.description, parsed.description);
            assert_eq!(original.display_ruler, parsed.display_ruler);
            assert_close(&original.geometry, &parsed.geometry);
        }
    }

    #[test]
    fn test_foreign_document() {
        let content = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <name>Imported</name>
    <Placemark>
      <name>Somewhere</name>
      <Point><coordinates>8.0,47.0,0</coordinates></Point>
    </Placemark>
  </Document>
</kml>"#;
        let features = read_kml(content).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].id.as_str(), "placemark_0");
        assert_eq!(features[0].kind, None);
        assert_close(&features[0].geometry, &Geometry::Point(from_lon_lat(Point::new(8.0, 47.0))));
    }

    #[test]
    fn test_bad_coordinates() {
        let content = r#"<kml><Document><Placemark id="x"><LineString><coordinates>1,a 2,3</coordinates></LineString></Placemark></Document></kml>"#;
        assert!(matches!(read_kml(content), Err(KmlError::Coordinates(_))));
    }
}
