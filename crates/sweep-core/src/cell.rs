//! Hierarchical spherical cells.
//!
//! Cells follow the S2 decomposition: the sphere is projected onto the six
//! faces of a cube, each face is warped with the quadratic projection and then
//! subdivided as a quadtree whose children are ordered along a Hilbert curve.
//! A [`CellId`] packs the face (3 bits), the curve position (2 bits per level)
//! and a trailing marker bit into a single `u64`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::position::Position;

/// Deepest level of the hierarchy (leaf cells, about 1 cm across).
pub const MAX_LEVEL: u8 = 30;

/// Level used for scan work: roughly city-block sized cells (~300 m).
pub const SCAN_LEVEL: u8 = 15;

const POS_BITS: u32 = 2 * MAX_LEVEL as u32 + 1;
const MAX_SIZE: i64 = 1 << MAX_LEVEL;

const SWAP_MASK: usize = 0x01;
const INVERT_MASK: usize = 0x02;

const IJ_TO_POS: [[u64; 4]; 4] = [[0, 1, 3, 2], [0, 3, 1, 2], [2, 3, 1, 0], [2, 1, 3, 0]];
const POS_TO_IJ: [[usize; 4]; 4] = [[0, 1, 3, 2], [0, 2, 3, 1], [3, 2, 0, 1], [3, 1, 0, 2]];
const POS_TO_ORIENTATION: [usize; 4] = [SWAP_MASK, 0, 0, INVERT_MASK | SWAP_MASK];

// Marker bits can only sit on even positions.
const LSB_MASK: u64 = 0x1555_5555_5555_5555;

/// Identifier of a cell at any level of the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(u64);

/// Latitude/longitude bounds of a cell, in degrees.
///
/// Longitudes are unwrapped around the cell centre, so a cell straddling the
/// antimeridian reports e.g. `179.99..180.01` rather than the whole circle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellBounds {
    /// Southern edge.
    pub min_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl CellId {
    /// Wrap a raw id without validation (see [`CellId::is_valid`]).
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// The raw 64-bit identifier.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Leaf cell containing the given point.
    pub fn from_lat_lng(lat_deg: f64, lon_deg: f64) -> Self {
        let (lat, lon) = (lat_deg.to_radians(), lon_deg.to_radians());
        let p = [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()];
        let (face, u, v) = xyz_to_face_uv(p);
        Self::from_face_ij(face, st_to_ij(uv_to_st(u)), st_to_ij(uv_to_st(v)))
    }

    /// Cell at `level` containing the given point.
    pub fn at_level(lat_deg: f64, lon_deg: f64, level: u8) -> Self {
        Self::from_lat_lng(lat_deg, lon_deg).parent(level)
    }

    /// Cube face (0..6).
    pub fn face(self) -> u8 {
        (self.0 >> POS_BITS) as u8
    }

    fn lsb(self) -> u64 {
        self.0 & self.0.wrapping_neg()
    }

    fn lsb_for_level(level: u8) -> u64 {
        1u64 << (2 * u32::from(MAX_LEVEL - level))
    }

    /// Whether this is a structurally valid id (known face, marker bit on an
    /// even position).
    pub fn is_valid(self) -> bool {
        self.face() < 6 && (self.lsb() & LSB_MASK) != 0
    }

    /// Level of the cell, `0..=MAX_LEVEL`. Only meaningful for valid ids.
    pub fn level(self) -> u8 {
        MAX_LEVEL - (self.0.trailing_zeros() / 2) as u8
    }

    /// Ancestor at `level`. `level` must not be deeper than this cell's level.
    pub fn parent(self, level: u8) -> Self {
        debug_assert!(level <= self.level());
        let lsb = Self::lsb_for_level(level);
        Self((self.0 & lsb.wrapping_neg()) | lsb)
    }

    /// Geographic centroid of the cell, altitude `0`.
    pub fn center(self) -> Position {
        let (face, i, j) = self.to_face_ij();
        let half = self.size_ij() as f64 * 0.5;
        let s = (i as f64 + half) / MAX_SIZE as f64;
        let t = (j as f64 + half) / MAX_SIZE as f64;
        let (lat, lon) = xyz_to_lat_lng(face_uv_to_xyz(face, st_to_uv(s), st_to_uv(t)));
        Position::at_ground(lat, lon)
    }

    /// The four corners of the cell as `(lat, lon)` in degrees, counter-clockwise.
    pub fn vertices(self) -> [(f64, f64); 4] {
        let (face, i, j) = self.to_face_ij();
        let size = self.size_ij();
        let corner = |ci: i64, cj: i64| {
            let s = ci as f64 / MAX_SIZE as f64;
            let t = cj as f64 / MAX_SIZE as f64;
            xyz_to_lat_lng(face_uv_to_xyz(face, st_to_uv(s), st_to_uv(t)))
        };
        [
            corner(i, j),
            corner(i + size, j),
            corner(i + size, j + size),
            corner(i, j + size),
        ]
    }

    /// Latitude/longitude bounds spanned by the cell's corners.
    pub fn bounds(self) -> CellBounds {
        let center = self.center();
        let mut b = CellBounds {
            min_lat: f64::INFINITY,
            min_lon: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
            max_lon: f64::NEG_INFINITY,
        };
        for (lat, lon) in self.vertices() {
            let mut lon = lon;
            while lon - center.lon > 180.0 {
                lon -= 360.0;
            }
            while center.lon - lon > 180.0 {
                lon += 360.0;
            }
            b.min_lat = b.min_lat.min(lat);
            b.max_lat = b.max_lat.max(lat);
            b.min_lon = b.min_lon.min(lon);
            b.max_lon = b.max_lon.max(lon);
        }
        // A corner on a pole has no meaningful longitude.
        if b.max_lat > 89.999_999 || b.min_lat < -89.999_999 {
            b.min_lon = -180.0;
            b.max_lon = 180.0;
        }
        b
    }

    /// Same-level cells sharing an edge or a corner with this one.
    pub fn neighbors(self) -> Vec<CellId> {
        let level = self.level();
        let size = self.size_ij();
        let (face, i, j) = self.to_face_ij();

        let mut out = Vec::with_capacity(8);
        for di in [-1i64, 0, 1] {
            for dj in [-1i64, 0, 1] {
                if di == 0 && dj == 0 {
                    continue;
                }
                let (ni, nj) = (i + di * size, j + dj * size);
                let same_face = (0..MAX_SIZE).contains(&ni) && (0..MAX_SIZE).contains(&nj);
                let leaf = if same_face {
                    Self::from_face_ij(face, ni, nj)
                } else {
                    Self::from_face_ij_wrap(face, ni, nj)
                };
                let neighbor = leaf.parent(level);
                if neighbor != self && !out.contains(&neighbor) {
                    out.push(neighbor);
                }
            }
        }
        out
    }

    /// Compact hex form (trailing zero nibbles stripped), as used by S2 tooling.
    pub fn token(self) -> String {
        if self.0 == 0 {
            return "X".to_string();
        }
        let hex = format!("{:016x}", self.0);
        hex.trim_end_matches('0').to_string()
    }

    fn size_ij(self) -> i64 {
        1i64 << (MAX_LEVEL - self.level())
    }

    fn from_face_ij(face: u8, i: i64, j: i64) -> Self {
        let mut orientation = usize::from(face) & SWAP_MASK;
        let mut pos: u64 = 0;
        for k in (0..u32::from(MAX_LEVEL)).rev() {
            let ij = ((((i >> k) & 1) << 1) | ((j >> k) & 1)) as usize;
            let p = IJ_TO_POS[orientation][ij];
            pos = (pos << 2) | p;
            orientation ^= POS_TO_ORIENTATION[p as usize];
        }
        Self((u64::from(face) << POS_BITS) | (pos << 1) | 1)
    }

    /// Like `from_face_ij`, but `i`/`j` may lie one step outside the face, in
    /// which case the point is re-projected onto the adjacent face.
    fn from_face_ij_wrap(face: u8, i: i64, j: i64) -> Self {
        let i = i.clamp(-1, MAX_SIZE);
        let j = j.clamp(-1, MAX_SIZE);
        let scale = 1.0 / MAX_SIZE as f64;
        let limit = 1.0 + f64::EPSILON;
        let u = (scale * (2 * (i - MAX_SIZE / 2) + 1) as f64).clamp(-limit, limit);
        let v = (scale * (2 * (j - MAX_SIZE / 2) + 1) as f64).clamp(-limit, limit);
        let (face, u, v) = xyz_to_face_uv(face_uv_to_xyz(face, u, v));
        Self::from_face_ij(face, st_to_ij(0.5 * (u + 1.0)), st_to_ij(0.5 * (v + 1.0)))
    }

    /// Face and leaf-space coordinates of the cell's lower-left corner.
    fn to_face_ij(self) -> (u8, i64, i64) {
        let face = self.face();
        let level = self.level();
        let mut orientation = usize::from(face) & SWAP_MASK;
        let (mut i, mut j) = (0i64, 0i64);
        for k in 1..=u32::from(level) {
            let p = ((self.0 >> (POS_BITS - 2 * k)) & 3) as usize;
            let ij = POS_TO_IJ[orientation][p];
            i = (i << 1) | (ij >> 1) as i64;
            j = (j << 1) | (ij & 1) as i64;
            orientation ^= POS_TO_ORIENTATION[p];
        }
        let shift = MAX_LEVEL - level;
        (face, i << shift, j << shift)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

fn st_to_uv(s: f64) -> f64 {
    if s >= 0.5 {
        (1.0 / 3.0) * (4.0 * s * s - 1.0)
    } else {
        (1.0 / 3.0) * (1.0 - 4.0 * (1.0 - s) * (1.0 - s))
    }
}

fn uv_to_st(u: f64) -> f64 {
    if u >= 0.0 {
        0.5 * (1.0 + 3.0 * u).sqrt()
    } else {
        1.0 - 0.5 * (1.0 - 3.0 * u).sqrt()
    }
}

fn st_to_ij(s: f64) -> i64 {
    ((MAX_SIZE as f64 * s).floor() as i64).clamp(0, MAX_SIZE - 1)
}

fn face_uv_to_xyz(face: u8, u: f64, v: f64) -> [f64; 3] {
    match face {
        0 => [1.0, u, v],
        1 => [-u, 1.0, v],
        2 => [-u, -v, 1.0],
        3 => [-1.0, -v, -u],
        4 => [v, -1.0, -u],
        _ => [v, u, -1.0],
    }
}

fn xyz_to_face_uv(p: [f64; 3]) -> (u8, f64, f64) {
    let [x, y, z] = p;
    let (ax, ay, az) = (x.abs(), y.abs(), z.abs());
    let axis = if ax > ay {
        if ax > az { 0 } else { 2 }
    } else if ay > az {
        1
    } else {
        2
    };
    let face = if p[axis] < 0.0 { axis + 3 } else { axis };
    let (u, v) = match face {
        0 => (y / x, z / x),
        1 => (-x / y, z / y),
        2 => (-x / z, -y / z),
        3 => (z / x, y / x),
        4 => (z / y, -x / y),
        _ => (-y / z, -x / z),
    };
    (face as u8, u, v)
}

fn xyz_to_lat_lng(p: [f64; 3]) -> (f64, f64) {
    let [x, y, z] = p;
    let lat = z.atan2((x * x + y * y).sqrt());
    let lon = y.atan2(x);
    (lat.to_degrees(), lon.to_degrees())
}
