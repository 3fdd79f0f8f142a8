//! Histogram containers produced by the histogrammer and analysis stages.

use daq_core::limits::{N_COL, N_PIXELS, N_ROW};
use daq_core::router::ChannelId;
use serde::{Deserialize, Serialize};

/// What a [`PixelMap`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapKind {
    /// Hits per pixel
    Occupancy,
    /// Sum of ToT per pixel
    TotSum,
    /// Sum of ToT² per pixel
    Tot2Sum,
    /// Mean ToT per pixel
    MeanTot,
    /// ToT standard deviation per pixel
    SigmaTot,
}

impl MapKind {
    /// Map name as shown in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            MapKind::Occupancy => "OccupancyMap",
            MapKind::TotSum => "TotMap",
            MapKind::Tot2Sum => "Tot2Map",
            MapKind::MeanTot => "MeanTotMap",
            MapKind::SigmaTot => "SigmaTotMap",
        }
    }
}

/// One value per pixel of a front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelMap {
    /// Content of the bins
    pub kind: MapKind,
    /// Channel the map belongs to
    pub channel: ChannelId,
    /// Scan iteration, `None` for maps combining all iterations
    pub iteration: Option<u32>,
    bins: Vec<f64>,
    entries: u64,
}

impl PixelMap {
    /// Zeroed map covering the whole pixel matrix.
    pub fn new(kind: MapKind, channel: ChannelId, iteration: Option<u32>) -> Self {
        Self {
            kind,
            channel,
            iteration,
            bins: vec![0.0; N_PIXELS],
            entries: 0,
        }
    }

    /// Bin index of a 1-based pixel, `None` outside the matrix.
    pub fn index(col: u16, row: u16) -> Option<usize> {
        let (col, row) = (usize::from(col), usize::from(row));
        if (1..=N_COL).contains(&col) && (1..=N_ROW).contains(&row) {
            Some((row - 1) * N_COL + (col - 1))
        } else {
            None
        }
    }

    /// Add `weight` to a pixel. Returns false for pixels outside the matrix.
    pub fn fill(&mut self, col: u16, row: u16, weight: f64) -> bool {
        match Self::index(col, row) {
            Some(i) => {
                self.bins[i] += weight;
                self.entries += 1;
                true
            }
            None => false,
        }
    }

    /// Value of a 1-based pixel, `None` outside the matrix.
    pub fn get(&self, col: u16, row: u16) -> Option<f64> {
        Self::index(col, row).map(|i| self.bins[i])
    }

    /// Overwrite a bin by index. Out-of-range indices are ignored.
    pub fn set_bin(&mut self, index: usize, value: f64) {
        if let Some(bin) = self.bins.get_mut(index) {
            *bin = value;
        }
    }

    /// Bins in row-major order.
    pub fn bins(&self) -> &[f64] {
        &self.bins
    }

    /// Number of `fill` calls (or summed entries after [`add`](Self::add)).
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Sum over all bins.
    pub fn sum(&self) -> f64 {
        self.bins.iter().sum()
    }

    /// Bin-wise add another map.
    pub fn add(&mut self, other: &PixelMap) {
        for (a, b) in self.bins.iter_mut().zip(&other.bins) {
            *a += b;
        }
        self.entries += other.entries;
    }
}

/// Fixed-width 1D histogram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    /// Histogram name
    pub name: String,
    /// Channel the distribution belongs to
    pub channel: ChannelId,
    lo: f64,
    hi: f64,
    bins: Vec<u64>,
    underflow: u64,
    overflow: u64,
}

impl Distribution {
    /// `bins` equal-width bins over `[lo, hi)`. At least one bin is kept.
    pub fn new(name: impl Into<String>, channel: ChannelId, bins: usize, lo: f64, hi: f64) -> Self {
        Self {
            name: name.into(),
            channel,
            lo,
            hi,
            bins: vec![0; bins.max(1)],
            underflow: 0,
            overflow: 0,
        }
    }

    /// Count `x`, or add it to the under/overflow.
    pub fn fill(&mut self, x: f64) {
        if x < self.lo {
            self.underflow += 1;
        } else if x >= self.hi {
            self.overflow += 1;
        } else {
            let width = (self.hi - self.lo) / self.bins.len() as f64;
            let i = (((x - self.lo) / width) as usize).min(self.bins.len() - 1);
            self.bins[i] += 1;
        }
    }

    /// In-range bin counts.
    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    /// In-range entries.
    pub fn entries(&self) -> u64 {
        self.bins.iter().sum()
    }

    /// Entries below `lo`.
    pub fn underflow(&self) -> u64 {
        self.underflow
    }

    /// Entries at or above `hi`.
    pub fn overflow(&self) -> u64 {
        self.overflow
    }
}

/// Item on a histogram queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Histogram {
    /// Per-pixel map
    Map(PixelMap),
    /// 1D distribution
    Dist(Distribution),
}

impl Histogram {
    /// Name of the contained histogram.
    pub fn name(&self) -> &str {
        match self {
            Histogram::Map(m) => m.kind.as_str(),
            Histogram::Dist(d) => &d.name,
        }
    }

    /// The pixel map, if this is one.
    pub fn as_map(&self) -> Option<&PixelMap> {
        match self {
            Histogram::Map(m) => Some(m),
            Histogram::Dist(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_map_fill_and_get() {
        let mut map = PixelMap::new(MapKind::Occupancy, 0, Some(2));
        assert!(map.fill(1, 1, 1.0));
        assert!(map.fill(80, 336, 2.0));
        assert!(!map.fill(0, 1, 1.0));
        assert!(!map.fill(1, 337, 1.0));
        assert_eq!(map.get(1, 1), Some(1.0));
        assert_eq!(map.get(80, 336), Some(2.0));
        assert_eq!(map.entries(), 2);
        assert_eq!(map.sum(), 3.0);
    }

    #[test]
    fn test_pixel_map_add() {
        let mut a = PixelMap::new(MapKind::TotSum, 1, None);
        let mut b = PixelMap::new(MapKind::TotSum, 1, Some(0));
        a.fill(5, 5, 3.0);
        b.fill(5, 5, 4.0);
        a.add(&b);
        assert_eq!(a.get(5, 5), Some(7.0));
        assert_eq!(a.entries(), 2);
    }

    #[test]
    fn test_distribution_edges() {
        let mut d = Distribution::new("MeanTotDist", 0, 16, 0.0, 16.0);
        d.fill(-0.1);
        d.fill(0.0);
        d.fill(7.5);
        d.fill(15.99);
        d.fill(16.0);
        assert_eq!(d.underflow(), 1);
        assert_eq!(d.overflow(), 1);
        assert_eq!(d.bins()[0], 1);
        assert_eq!(d.bins()[7], 1);
        assert_eq!(d.bins()[15], 1);
        assert_eq!(d.entries(), 3);
    }
}
