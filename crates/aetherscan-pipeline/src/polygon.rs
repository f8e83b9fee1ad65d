//! Raster-to-vector conversion of change masks.
//!
//! Connected regions of equal label are traced along pixel edges into
//! closed rings, so every on-pixel is covered by exactly one feature and
//! features never overlap. Region boundaries follow pixel corners
//! exactly; no simplification is applied.

use std::collections::HashMap;

use geo::orient::{Direction, Orient};
use geo::{Coord, LineString, Polygon};
use image::Luma;
use imageproc::region_labelling::{Connectivity, connected_components};
use serde::{Serialize, Serializer};

use crate::types::{ChangeMask, DetectionConfig, GeoTransform};

/// One connected region of a mask.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonFeature {
    /// Mask label the region was traced from.
    pub value: u8,
    /// Boundary in spatial coordinates, exterior counter-clockwise.
    pub geometry: Polygon<f64>,
    /// Number of mask pixels in the region.
    pub pixel_count: u64,
}

/// Features in polygonization scan order.
///
/// Serializes as a GeoJSON `FeatureCollection` with a `value` and a
/// `pixel_count` property per feature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    /// The features, ordered by the raster position of each region's
    /// first pixel.
    pub features: Vec<PolygonFeature>,
}

impl FeatureCollection {
    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether there are no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Tuning for [`to_polygons`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolygonizeOptions {
    /// Smallest label treated as "on". Values below `1` behave as `1`.
    pub min_value: u8,
    /// Discard regions with fewer pixels than this. `None` keeps all.
    pub min_area_px: Option<u32>,
}

impl Default for PolygonizeOptions {
    fn default() -> Self {
        Self {
            min_value: DetectionConfig::DEFAULT_POLYGON_MIN_VALUE,
            min_area_px: None,
        }
    }
}

impl From<&DetectionConfig> for PolygonizeOptions {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            min_value: config.polygon_min_value,
            min_area_px: config.min_area_px,
        }
    }
}

/// Convert a label mask into polygons in the transform's coordinates.
///
/// Pixels labelled below `options.min_value` are background. Remaining
/// pixels are grouped into 4-connected regions of equal label, one
/// feature per region; pixels that only touch diagonally end up in
/// separate features.
#[must_use]
pub fn to_polygons(
    mask: &ChangeMask,
    transform: &GeoTransform,
    options: PolygonizeOptions,
) -> FeatureCollection {
    let min_value = options.min_value.max(1);
    let on = ChangeMask::from_fn(mask.width(), mask.height(), |x, y| {
        let v = mask.get_pixel(x, y).0[0];
        Luma([if v >= min_value { v } else { 0 }])
    });
    let labels = connected_components(&on, Connectivity::Four, Luma([0u8]));

    let regions = collect_regions(&on, &labels);
    let mut features = Vec::with_capacity(regions.len());
    for region in regions {
        if options
            .min_area_px
            .is_some_and(|min| region.pixel_count < u64::from(min))
        {
            continue;
        }
        if let Some(geometry) = region_polygon(&region.edges, transform) {
            features.push(PolygonFeature {
                value: region.value,
                geometry,
                pixel_count: region.pixel_count,
            });
        }
    }

    tracing::debug!(
        features = features.len(),
        min_value,
        min_area_px = options.min_area_px,
        "mask polygonized"
    );
    FeatureCollection { features }
}

/// Heading of a boundary edge in pixel (y-down) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Heading {
    East,
    South,
    West,
    North,
}

impl Heading {
    const fn right(self) -> Self {
        match self {
            Self::East => Self::South,
            Self::South => Self::West,
            Self::West => Self::North,
            Self::North => Self::East,
        }
    }

    const fn left(self) -> Self {
        match self {
            Self::East => Self::North,
            Self::South => Self::East,
            Self::West => Self::South,
            Self::North => Self::West,
        }
    }
}

/// Directed unit edge between two pixel corners, region on its right.
#[derive(Debug, Clone, Copy)]
struct Edge {
    from: (u32, u32),
    to: (u32, u32),
    heading: Heading,
}

struct Region {
    value: u8,
    pixel_count: u64,
    edges: Vec<Edge>,
}

/// Group boundary edges by region, in order of first appearance.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn collect_regions(on: &ChangeMask, labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>) -> Vec<Region> {
    let (width, height) = labels.dimensions();
    let mut index_of: HashMap<u32, usize> = HashMap::new();
    let mut regions: Vec<Region> = Vec::new();

    let same = |label: u32, x: i64, y: i64| -> bool {
        x >= 0
            && y >= 0
            && x < i64::from(width)
            && y < i64::from(height)
            && labels.get_pixel(x as u32, y as u32).0[0] == label
    };

    for (x, y, p) in labels.enumerate_pixels() {
        let label = p.0[0];
        if label == 0 {
            continue;
        }
        let idx = *index_of.entry(label).or_insert_with(|| {
            regions.push(Region {
                value: on.get_pixel(x, y).0[0],
                pixel_count: 0,
                edges: Vec::new(),
            });
            regions.len() - 1
        });
        let region = &mut regions[idx];
        region.pixel_count += 1;

        let (xi, yi) = (i64::from(x), i64::from(y));
        if !same(label, xi, yi - 1) {
            region.edges.push(Edge {
                from: (x, y),
                to: (x + 1, y),
                heading: Heading::East,
            });
        }
        if !same(label, xi + 1, yi) {
            region.edges.push(Edge {
                from: (x + 1, y),
                to: (x + 1, y + 1),
                heading: Heading::South,
            });
        }
        if !same(label, xi, yi + 1) {
            region.edges.push(Edge {
                from: (x + 1, y + 1),
                to: (x, y + 1),
                heading: Heading::West,
            });
        }
        if !same(label, xi - 1, yi) {
            region.edges.push(Edge {
                from: (x, y + 1),
                to: (x, y),
                heading: Heading::North,
            });
        }
    }
    regions
}

/// Link a region's edges into rings and assemble them into a polygon.
///
/// At corners where the region touches itself diagonally the walk turns
/// right first, so the two pixels stay apart at that corner as
/// 4-connectivity requires. A walk that comes back to a corner it has
/// already passed is cut there into simple loops; loops that enclose
/// background become holes touching the outer ring at that corner.
fn region_polygon(edges: &[Edge], transform: &GeoTransform) -> Option<Polygon<f64>> {
    let mut outgoing: HashMap<(u32, u32), Vec<usize>> = HashMap::new();
    for (i, edge) in edges.iter().enumerate() {
        outgoing.entry(edge.from).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut exteriors: Vec<(f64, Vec<(u32, u32)>)> = Vec::new();
    let mut holes: Vec<Vec<(u32, u32)>> = Vec::new();

    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        let mut ring: Vec<usize> = Vec::new();
        let mut current = start;
        loop {
            used[current] = true;
            ring.push(current);
            let edge = edges[current];
            let candidates = outgoing.get(&edge.to).map_or(&[][..], Vec::as_slice);
            let next = [edge.heading.right(), edge.heading, edge.heading.left()]
                .into_iter()
                .find_map(|heading| {
                    candidates.iter().copied().find(|&i| {
                        edges[i].heading == heading && (i == start || !used[i])
                    })
                });
            match next {
                Some(i) if i == start => break,
                Some(i) => current = i,
                None => break,
            }
        }

        for simple in split_at_repeated_corners(edges, &ring) {
            let corners = ring_corners(edges, &simple);
            let area = signed_area(&corners);
            if area > 0.0 {
                exteriors.push((area, corners));
            } else {
                holes.push(corners);
            }
        }
    }

    let (_, exterior) = exteriors
        .into_iter()
        .max_by(|a, b| a.0.total_cmp(&b.0))?;
    let to_line = |corners: &[(u32, u32)]| -> LineString<f64> {
        corners
            .iter()
            .map(|&(col, row)| {
                let (x, y) = transform.apply(f64::from(col), f64::from(row));
                Coord { x, y }
            })
            .collect()
    };
    let polygon = Polygon::new(
        to_line(&exterior),
        holes.iter().map(|h| to_line(h)).collect(),
    );
    Some(polygon.orient(Direction::Default))
}

/// Cut a closed walk into loops that visit no corner twice.
fn split_at_repeated_corners(edges: &[Edge], walk: &[usize]) -> Vec<Vec<usize>> {
    let mut loops = Vec::new();
    let mut path: Vec<usize> = Vec::with_capacity(walk.len());
    let mut position: HashMap<(u32, u32), usize> = HashMap::new();
    for &i in walk {
        let corner = edges[i].from;
        if let Some(start) = position.get(&corner).copied() {
            let closed: Vec<usize> = path.drain(start..).collect();
            for &j in &closed {
                position.remove(&edges[j].from);
            }
            loops.push(closed);
        }
        position.insert(corner, path.len());
        path.push(i);
    }
    if !path.is_empty() {
        loops.push(path);
    }
    loops
}

/// Vertices where the ring changes heading.
fn ring_corners(edges: &[Edge], ring: &[usize]) -> Vec<(u32, u32)> {
    let n = ring.len();
    (0..n)
        .filter(|&k| edges[ring[k]].heading != edges[ring[(k + n - 1) % n]].heading)
        .map(|k| edges[ring[k]].from)
        .collect()
}

/// Shoelace area in pixel (y-down) coordinates; positive for rings
/// that keep the region on their right.
fn signed_area(corners: &[(u32, u32)]) -> f64 {
    let n = corners.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let (x0, y0) = corners[i];
            let (x1, y1) = corners[(i + 1) % n];
            f64::from(x0).mul_add(f64::from(y1), -(f64::from(x1) * f64::from(y0)))
        })
        .sum();
    twice / 2.0
}

#[derive(Serialize)]
struct GeoJsonCollection<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    features: Vec<GeoJsonFeature<'a>>,
}

#[derive(Serialize)]
struct GeoJsonFeature<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    properties: GeoJsonProperties,
    geometry: GeoJsonPolygon<'a>,
}

#[derive(Serialize)]
struct GeoJsonProperties {
    value: u8,
    pixel_count: u64,
}

struct GeoJsonPolygon<'a>(&'a Polygon<f64>);

impl Serialize for GeoJsonPolygon<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Proxy {
            #[serde(rename = "type")]
            kind: &'static str,
            coordinates: Vec<Vec<[f64; 2]>>,
        }

        let ring = |line: &LineString<f64>| line.coords().map(|c| [c.x, c.y]).collect::<Vec<_>>();
        let mut coordinates = vec![ring(self.0.exterior())];
        coordinates.extend(self.0.interiors().iter().map(ring));
        Proxy {
            kind: "Polygon",
            coordinates,
        }
        .serialize(serializer)
    }
}

impl Serialize for FeatureCollection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        GeoJsonCollection {
            kind: "FeatureCollection",
            features: self
                .features
                .iter()
                .map(|f| GeoJsonFeature {
                    kind: "Feature",
                    properties: GeoJsonProperties {
                        value: f.value,
                        pixel_count: f.pixel_count,
                    },
                    geometry: GeoJsonPolygon(&f.geometry),
                })
                .collect(),
        }
        .serialize(serializer)
    }
}
