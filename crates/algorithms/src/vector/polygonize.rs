//! Raster to polygon conversion for class grids
//!
//! Regions are maximal 4-connected sets of pixels sharing a class value.
//! Each region's boundary is traced along pixel edges: every exposed pixel
//! side becomes a directed edge with the region on its right (image
//! coordinates, y down), and edges are chained into rings. Membership is
//! decided by 4-connected labelling alone, so diagonal neighbours never
//! join a region. Where two diagonal pixels of one region meet at a corner
//! the tracer stays on the background pixel it is walking along; the shell
//! and the hole then meet at that corner as two simple rings.

use std::collections::{HashMap, VecDeque};

use geo::orient::{Direction, Orient};
use geo_types::{Coord, LineString, Polygon};
use ndarray::Array2;
use crate::maybe_rayon::*;
use landpulse_core::raster::{GeoTransform, Raster, RasterElement};
use landpulse_core::{Algorithm, Error, Result};

/// One connected region of a class grid
#[derive(Debug, Clone)]
pub struct ClassRegion {
    /// Region outline in the grid's CRS: exterior counter-clockwise, holes
    /// clockwise
    pub polygon: Polygon<f64>,
    pub class_id: u8,
    pub pixel_count: usize,
    /// Member pixels as `(row, col)`, raster-scan order
    pub pixels: Vec<(usize, usize)>,
}

/// Parameters for [`Vectorize`]
#[derive(Debug, Clone, Copy)]
pub struct VectorizeParams {
    /// Class value that produces no polygons
    pub background: u8,
}

impl Default for VectorizeParams {
    fn default() -> Self {
        Self { background: 0 }
    }
}

/// Polygonize a class grid
#[derive(Debug, Clone, Default)]
pub struct Vectorize;

impl Algorithm for Vectorize {
    type Input = Raster<u8>;
    type Output = Vec<ClassRegion>;
    type Params = VectorizeParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Vectorize"
    }

    fn description(&self) -> &'static str {
        "Convert 4-connected class regions into polygons"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        vectorize(&input, params.background)
    }
}

/// Polygonize every region of `grid` whose class is neither `background`
/// nor the grid's no-data value.
///
/// Regions come back in raster-scan order of their first pixel. A grid with
/// nothing but background yields an empty list.
pub fn vectorize(grid: &Raster<u8>, background: u8) -> Result<Vec<ClassRegion>> {
    let (labels, components) = label_components(grid, background);
    let transform = *grid.transform();

    components
        .into_par_iter()
        .enumerate()
        .map(|(i, (class_id, pixels))| {
            let label = i as u32 + 1;
            let polygon = trace_region(&labels, label, &pixels, &transform)?;
            Ok(ClassRegion {
                polygon,
                class_id,
                pixel_count: pixels.len(),
                pixels,
            })
        })
        .collect()
}

/// 4-connected component labelling by breadth-first flood fill.
///
/// Label 0 means "no region"; component `i` carries label `i + 1`.
fn label_components(grid: &Raster<u8>, background: u8) -> (Array2<u32>, Vec<(u8, Vec<(usize, usize)>)>) {
    let (rows, cols) = grid.shape();
    let nodata = grid.nodata();
    let data = grid.data();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut components = Vec::new();
    let mut queue = VecDeque::new();

    for row in 0..rows {
        for col in 0..cols {
            let class = data[(row, col)];
            if class == background || class.is_nodata(nodata) || labels[(row, col)] != 0 {
                continue;
            }

            let label = components.len() as u32 + 1;
            let mut pixels = Vec::new();
            labels[(row, col)] = label;
            queue.push_back((row, col));

            while let Some((r, c)) = queue.pop_front() {
                pixels.push((r, c));
                let neighbors = [
                    (r.wrapping_sub(1), c),
                    (r + 1, c),
                    (r, c.wrapping_sub(1)),
                    (r, c + 1),
                ];
                for (nr, nc) in neighbors {
                    if nr < rows && nc < cols && labels[(nr, nc)] == 0 && data[(nr, nc)] == class {
                        labels[(nr, nc)] = label;
                        queue.push_back((nr, nc));
                    }
                }
            }

            pixels.sort_unstable();
            components.push((class, pixels));
        }
    }

    (labels, components)
}

/// Heading of a boundary edge in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Heading {
    East,
    South,
    West,
    North,
}

impl Heading {
    fn right(self) -> Self {
        match self {
            Heading::East => Heading::South,
            Heading::South => Heading::West,
            Heading::West => Heading::North,
            Heading::North => Heading::East,
        }
    }

    fn left(self) -> Self {
        match self {
            Heading::East => Heading::North,
            Heading::North => Heading::West,
            Heading::West => Heading::South,
            Heading::South => Heading::East,
        }
    }
}

/// Pixel corner `(x, y)`: `x` is a column edge, `y` a row edge
type Corner = (usize, usize);

#[derive(Debug, Clone, Copy)]
struct Edge {
    start: Corner,
    end: Corner,
    heading: Heading,
}

fn trace_region(
    labels: &Array2<u32>,
    label: u32,
    pixels: &[(usize, usize)],
    transform: &GeoTransform,
) -> Result<Polygon<f64>> {
    let (rows, cols) = labels.dim();
    let inside = |r: Option<usize>, c: Option<usize>| match (r, c) {
        (Some(r), Some(c)) if r < rows && c < cols => labels[(r, c)] == label,
        _ => false,
    };

    let mut edges = Vec::new();
    for &(r, c) in pixels {
        if !inside(r.checked_sub(1), Some(c)) {
            edges.push(Edge { start: (c, r), end: (c + 1, r), heading: Heading::East });
        }
        if !inside(Some(r), Some(c + 1)) {
            edges.push(Edge { start: (c + 1, r), end: (c + 1, r + 1), heading: Heading::South });
        }
        if !inside(Some(r + 1), Some(c)) {
            edges.push(Edge { start: (c + 1, r + 1), end: (c, r + 1), heading: Heading::West });
        }
        if !inside(Some(r), c.checked_sub(1)) {
            edges.push(Edge { start: (c, r + 1), end: (c, r), heading: Heading::North });
        }
    }

    let mut outgoing: HashMap<Corner, Vec<usize>> = HashMap::with_capacity(edges.len());
    for (i, e) in edges.iter().enumerate() {
        outgoing.entry(e.start).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut rings: Vec<Vec<Corner>> = Vec::new();

    for first in 0..edges.len() {
        if used[first] {
            continue;
        }
        let mut ring = Vec::new();
        let mut current = first;
        loop {
            used[current] = true;
            let edge = edges[current];
            let next = next_edge(&edges, &outgoing, edge).ok_or_else(|| {
                Error::Algorithm(format!("open boundary at corner {:?}", edge.end))
            })?;
            // Keep only corners where the heading changes
            if edges[next].heading != edge.heading {
                ring.push(edge.end);
            }
            if next == first {
                break;
            }
            if used[next] {
                return Err(Error::Algorithm(format!(
                    "boundary revisits an edge at corner {:?}",
                    edge.end
                )));
            }
            current = next;
        }
        rings.push(ring);
    }

    let mut exterior = None;
    let mut holes = Vec::new();
    for ring in rings {
        if signed_area(&ring) > 0.0 && exterior.is_none() {
            exterior = Some(ring);
        } else {
            holes.push(ring);
        }
    }
    let exterior = exterior.ok_or_else(|| Error::Algorithm("region without exterior ring".into()))?;

    let to_line = |ring: &[Corner]| -> LineString<f64> {
        ring.iter()
            .map(|&(x, y)| {
                let (gx, gy) = transform.pixel_to_geo_corner(x, y);
                Coord { x: gx, y: gy }
            })
            .collect::<Vec<_>>()
            .into()
    };

    let polygon = Polygon::new(to_line(&exterior), holes.iter().map(|h| to_line(h)).collect());
    Ok(polygon.orient(Direction::Default))
}

/// Successor of `edge` among the outgoing edges at its end.
///
/// Only pinch corners offer two candidates; there the left turn follows
/// the same background pixel.
fn next_edge(edges: &[Edge], outgoing: &HashMap<Corner, Vec<usize>>, edge: Edge) -> Option<usize> {
    let candidates = outgoing.get(&edge.end)?;
    [edge.heading.left(), edge.heading, edge.heading.right()]
        .into_iter()
        .find_map(|h| candidates.iter().copied().find(|&i| edges[i].heading == h))
}

/// Shoelace area in image coordinates; positive for the outer boundary
fn signed_area(ring: &[Corner]) -> f64 {
    let n = ring.len();
    let mut sum = 0.0;
    for i in 0..n {
        let (x0, y0) = ring[i];
        let (x1, y1) = ring[(i + 1) % n];
        sum += x0 as f64 * y1 as f64 - x1 as f64 * y0 as f64;
    }
    sum / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    fn make_classes(rows: usize, cols: usize, data: Vec<u8>) -> Raster<u8> {
        let mut r = Raster::from_vec(data, rows, cols).unwrap();
        r.set_transform(GeoTransform::new(100.0, 200.0, 10.0, -10.0));
        r.set_nodata(Some(255));
        r
    }

    #[test]
    fn test_all_background_is_empty() {
        let grid = make_classes(3, 3, vec![0; 9]);
        assert!(vectorize(&grid, 0).unwrap().is_empty());
    }

    #[test]
    fn test_single_pixel() {
        let mut data = vec![0; 9];
        data[4] = 2;
        let grid = make_classes(3, 3, data);
        let regions = vectorize(&grid, 0).unwrap();

        assert_eq!(regions.len(), 1);
        let region = &regions[0];
        assert_eq!(region.class_id, 2);
        assert_eq!(region.pixel_count, 1);
        assert_eq!(region.pixels, vec![(1, 1)]);
        assert_eq!(region.polygon.exterior().0.len(), 5);
        assert!((region.polygon.signed_area() - 100.0).abs() < 1e-9);

        let xs: Vec<f64> = region.polygon.exterior().0.iter().map(|c| c.x).collect();
        assert!(xs.iter().all(|&x| x == 110.0 || x == 120.0));
    }

    #[test]
    fn test_block_merges_collinear_vertices() {
        let data = vec![
            1, 1, 1, 0,
            1, 1, 1, 0,
            0, 0, 0, 0,
        ];
        let grid = make_classes(3, 4, data);
        let regions = vectorize(&grid, 0).unwrap();
        assert_eq!(regions.len(), 1);
        // Rectangle: four corners plus the closing point
        assert_eq!(regions[0].polygon.exterior().0.len(), 5);
        assert!((regions[0].polygon.unsigned_area() - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_ring_with_hole() {
        let data = vec![
            1, 1, 1,
            1, 0, 1,
            1, 1, 1,
        ];
        let grid = make_classes(3, 3, data);
        let regions = vectorize(&grid, 0).unwrap();
        assert_eq!(regions.len(), 1);

        let poly = &regions[0].polygon;
        assert_eq!(poly.interiors().len(), 1);
        assert_eq!(regions[0].pixel_count, 8);
        // Exterior CCW, hole CW
        assert!(poly.exterior().0.len() == 5 && poly.interiors()[0].0.len() == 5);
        assert!((poly.signed_area() - 800.0).abs() < 1e-9);
    }

    #[test]
    fn test_diagonal_pixels_stay_separate() {
        let data = vec![
            1, 0,
            0, 1,
        ];
        let grid = make_classes(2, 2, data);
        let regions = vectorize(&grid, 0).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].pixels, vec![(0, 0)]);
        assert_eq!(regions[1].pixels, vec![(1, 1)]);
        for r in &regions {
            assert!((r.polygon.signed_area() - 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_pinch_inside_one_region() {
        // The ring of 1s closes only diagonally, at the lower-right corner
        // of the hole pixel
        let data = vec![
            1, 1, 1,
            1, 0, 1,
            1, 1, 0,
            0, 0, 1,
        ];
        let grid = make_classes(4, 3, data);
        let regions = vectorize(&grid, 0).unwrap();

        // Bottom-right pixel is only diagonally attached
        assert_eq!(regions.len(), 2);
        let main = &regions[0];
        assert_eq!(main.pixel_count, 7);
        assert_eq!(main.polygon.interiors().len(), 1);
        assert_eq!(main.polygon.interiors()[0].0.len(), 5);
        assert!((main.polygon.unsigned_area() - 700.0).abs() < 1e-9);
        assert_eq!(regions[1].pixels, vec![(3, 2)]);
    }

    #[test]
    fn test_classes_and_nodata() {
        let data = vec![
            1, 1, 2,
            255, 2, 2,
        ];
        let grid = make_classes(2, 3, data);
        let regions = vectorize(&grid, 0).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].class_id, 1);
        assert_eq!(regions[0].pixel_count, 2);
        assert_eq!(regions[1].class_id, 2);
        assert_eq!(regions[1].pixel_count, 3);
        let total: usize = regions.iter().map(|r| r.pixel_count).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_background_other_than_zero() {
        let grid = make_classes(1, 3, vec![7, 0, 7]);
        let regions = vectorize(&grid, 7).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].class_id, 0);
    }
}
