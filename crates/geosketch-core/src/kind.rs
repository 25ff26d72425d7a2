//! Session and geometry kinds.

use crate::config::MinPoints;
use crate::feature::{FeatureStyle, StyleOption};
use crate::geometry::GeometryType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The tool a session (and every feature it creates) belongs to.
///
/// The kind is the provenance prefix of feature ids, which is how one tool
/// recognizes features created by the other one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Draw,
    Measure,
}

impl SessionKind {
    /// Feature id prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            SessionKind::Draw => "draw",
            SessionKind::Measure => "measure",
        }
    }

    /// Parse a feature id prefix.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "draw" => Some(SessionKind::Draw),
            "measure" => Some(SessionKind::Measure),
            _ => None,
        }
    }

    /// The sibling tool.
    pub fn other(self) -> Self {
        match self {
            SessionKind::Draw => SessionKind::Measure,
            SessionKind::Measure => SessionKind::Draw,
        }
    }

    /// Human readable label used for registered layers.
    pub fn label(self) -> &'static str {
        match self {
            SessionKind::Draw => "Drawing",
            SessionKind::Measure => "Measurement",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Geometry kinds that can be sketched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawKind {
    /// A point rendered with a symbol. Needs `symbol_src`.
    Marker,
    /// A point rendered as a label. Needs a non-empty `text`.
    Text,
    Line,
    Polygon,
    /// Measurement ruler: a line that becomes a polygon when closed.
    Measure,
}

impl DrawKind {
    pub const ALL: [DrawKind; 5] = [
        DrawKind::Marker,
        DrawKind::Text,
        DrawKind::Line,
        DrawKind::Polygon,
        DrawKind::Measure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DrawKind::Marker => "marker",
            DrawKind::Text => "text",
            DrawKind::Line => "line",
            DrawKind::Polygon => "polygon",
            DrawKind::Measure => "measure",
        }
    }

    /// The tool allowed to sketch this kind.
    pub fn session_kind(self) -> SessionKind {
        match self {
            DrawKind::Measure => SessionKind::Measure,
            _ => SessionKind::Draw,
        }
    }

    /// Geometry produced while sketching. A closed measurement becomes a polygon.
    pub fn geometry_type(self) -> GeometryType {
        match self {
            DrawKind::Marker | DrawKind::Text => GeometryType::Point,
            DrawKind::Line | DrawKind::Measure => GeometryType::LineString,
            DrawKind::Polygon => GeometryType::Polygon,
        }
    }

    /// Point kinds are complete with their first vertex.
    pub fn is_single_point(self) -> bool {
        self.geometry_type() == GeometryType::Point
    }

    /// Whether snapping back onto the first vertex closes the sketch.
    pub fn can_close(self) -> bool {
        matches!(self, DrawKind::Polygon | DrawKind::Measure)
    }

    /// Minimum number of distinct vertices for a valid geometry.
    pub fn min_points(self, thresholds: &MinPoints) -> usize {
        match self.geometry_type() {
            GeometryType::Point => thresholds.point,
            GeometryType::LineString => thresholds.line,
            GeometryType::Polygon => thresholds.polygon,
        }
    }

    /// Name of the style attribute this kind needs but `style` lacks.
    pub fn missing_prerequisite(self, style: &StyleOption) -> Option<&'static str> {
        match self {
            DrawKind::Marker if style.symbol_src.as_deref().is_none_or(str::is_empty) => {
                Some("symbol")
            }
            DrawKind::Text if style.text.as_deref().is_none_or(|t| t.trim().is_empty()) => {
                Some("text")
            }
            _ => None,
        }
    }

    /// Style attributes a new feature of this kind takes from the session style.
    pub fn style_for(self, style: &StyleOption) -> FeatureStyle {
        match self {
            DrawKind::Marker => FeatureStyle {
                symbol_src: style.symbol_src.clone(),
                scale: Some(style.scale),
                color: Some(style.color),
                text: None,
            },
            DrawKind::Text => FeatureStyle {
                symbol_src: None,
                scale: Some(style.scale),
                color: Some(style.color),
                text: style.text.clone(),
            },
            DrawKind::Line | DrawKind::Polygon => FeatureStyle {
                color: Some(style.color),
                ..FeatureStyle::default()
            },
            DrawKind::Measure => FeatureStyle {
                color: Some(crate::feature::FeatureColor::MEASURE),
                ..FeatureStyle::default()
            },
        }
    }
}

impl fmt::Display for DrawKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DrawKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DrawKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// A draw request as published in the store. Unknown kinds are kept
/// so they can be reported instead of silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawKindRequest {
    Kind(DrawKind),
    Unsupported(String),
}

impl From<&str> for DrawKindRequest {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(kind) => DrawKindRequest::Kind(kind),
            Err(unknown) => DrawKindRequest::Unsupported(unknown),
        }
    }
}

impl From<DrawKind> for DrawKindRequest {
    fn from(kind: DrawKind) -> Self {
        DrawKindRequest::Kind(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_round_trip() {
        for kind in [SessionKind::Draw, SessionKind::Measure] {
            assert_eq!(SessionKind::from_prefix(kind.prefix()), Some(kind));
        }
        assert_eq!(SessionKind::from_prefix("other"), None);
        assert_eq!(SessionKind::Draw.other(), SessionKind::Measure);
    }

    #[test]
    fn test_request_parsing() {
        assert_eq!(DrawKindRequest::from("line"), DrawKindRequest::Kind(DrawKind::Line));
        assert_eq!(
            DrawKindRequest::from("circle"),
            DrawKindRequest::Unsupported("circle".to_string())
        );
    }

    #[test]
    fn test_prerequisites() {
        let mut style = StyleOption::default();
        assert_eq!(DrawKind::Marker.missing_prerequisite(&style), Some("symbol"));
        assert_eq!(DrawKind::Text.missing_prerequisite(&style), Some("text"));
        assert_eq!(DrawKind::Line.missing_prerequisite(&style), None);

        style.symbol_src = Some("marker.svg".to_string());
        style.text = Some("  ".to_string());
        assert_eq!(DrawKind::Marker.missing_prerequisite(&style), None);
        assert_eq!(DrawKind::Text.missing_prerequisite(&style), Some("text"));
    }

    #[test]
    fn test_min_points() {
        let thresholds = MinPoints::default();
        assert_eq!(DrawKind::Marker.min_points(&thresholds), 1);
        assert_eq!(DrawKind::Line.min_points(&thresholds), 2);
        assert_eq!(DrawKind::Measure.min_points(&thresholds), 2);
        assert_eq!(DrawKind::Polygon.min_points(&thresholds), 3);
    }
}
