//! Group many small polygons into a few convex regions.
//!
//! Member centroids are partitioned with k-means++ for every candidate
//! cluster count, each fit is scored with the Akaike information criterion,
//! and the count at the elbow of the AIC curve is refit and turned into one
//! convex hull per cluster.

use std::f64::consts::PI;

use geo::{Centroid, Coord, MultiPolygon, Polygon};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::polygon::{oriented_hull, PolygonSet};

const SWEEP_SEED: u64 = 42;
const FINAL_SEED: u64 = 5;
const FINAL_MAX_ITER: usize = 400;

/// Lloyd's k-means with k-means++ seeding.
#[derive(Debug, Clone)]
pub struct KMeans {
    n_clusters: usize,
    max_iter: usize,
    n_init: usize,
    seed: u64,
}

/// Result of a k-means fit.
#[derive(Debug, Clone)]
pub struct KMeansFit {
    /// Cluster index for each input point.
    pub labels: Vec<usize>,
    pub centers: Vec<Coord<f64>>,
    /// Within-cluster sum of squared distances.
    pub inertia: f64,
}

fn squared_distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).powi(2) + (a.y - b.y).powi(2)
}

fn nearest(point: Coord<f64>, centers: &[Coord<f64>]) -> (usize, f64) {
    let mut best_cluster = 0;
    let mut best_dist = f64::INFINITY;
    for (j, center) in centers.iter().enumerate() {
        let dist = squared_distance(point, *center);
        if dist < best_dist {
            best_dist = dist;
            best_cluster = j;
        }
    }
    (best_cluster, best_dist)
}

impl KMeans {
    pub fn new(n_clusters: usize) -> Self {
        Self { n_clusters, max_iter: 300, n_init: 1, seed: 0 }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Fit the model, keeping the best of `n_init` seeded runs.
    pub fn fit(&self, points: &[Coord<f64>]) -> KMeansFit {
        if points.is_empty() || self.n_clusters == 0 {
            return KMeansFit { labels: Vec::new(), centers: Vec::new(), inertia: 0.0 };
        }
        let k = self.n_clusters.min(points.len());

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut best: Option<KMeansFit> = None;
        for _ in 0..self.n_init {
            let centers = Self::init_centers(points, k, &mut rng);
            let fit = self.lloyd(points, centers);
            if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
                best = Some(fit);
            }
        }
        best.unwrap_or_else(|| KMeansFit { labels: Vec::new(), centers: Vec::new(), inertia: 0.0 })
    }

    /// k-means++: each new center drawn with probability proportional to its
    /// squared distance from the centers chosen so far.
    fn init_centers(points: &[Coord<f64>], k: usize, rng: &mut StdRng) -> Vec<Coord<f64>> {
        let mut centers = Vec::with_capacity(k);
        centers.push(points[rng.random_range(0..points.len())]);

        let mut dists: Vec<f64> = points.iter().map(|p| squared_distance(*p, centers[0])).collect();
        while centers.len() < k {
            let total: f64 = dists.iter().sum();
            let next = if total > 0.0 {
                let mut target = rng.random::<f64>() * total;
                // rounding can exhaust `target`; fall back to the last point not yet a center
                let mut chosen = dists.iter().rposition(|d| *d > 0.0).unwrap_or(0);
                for (i, d) in dists.iter().enumerate() {
                    if target < *d {
                        chosen = i;
                        break;
                    }
                    target -= d;
                }
                chosen
            } else {
                rng.random_range(0..points.len())
            };
            centers.push(points[next]);
            for (d, p) in dists.iter_mut().zip(points) {
                *d = d.min(squared_distance(*p, points[next]));
            }
        }
        centers
    }

    fn lloyd(&self, points: &[Coord<f64>], mut centers: Vec<Coord<f64>>) -> KMeansFit {
        let k = centers.len();
        let mut labels = vec![usize::MAX; points.len()];

        for _iter in 0..self.max_iter {
            let mut changed = false;
            for (i, point) in points.iter().enumerate() {
                let (cluster, _) = nearest(*point, &centers);
                if labels[i] != cluster {
                    labels[i] = cluster;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            let mut sums = vec![Coord { x: 0.0, y: 0.0 }; k];
            let mut counts = vec![0usize; k];
            for (point, label) in points.iter().zip(&labels) {
                sums[*label] = sums[*label] + *point;
                counts[*label] += 1;
            }
            for j in 0..k {
                if counts[j] > 0 {
                    centers[j] = sums[j] / counts[j] as f64;
                } else {
                    // an empty cluster takes over the worst-served point
                    let (far, _) = points
                        .iter()
                        .zip(&labels)
                        .map(|(p, l)| squared_distance(*p, centers[*l]))
                        .enumerate()
                        .fold((0, f64::MIN), |acc, (i, d)| if d > acc.1 { (i, d) } else { acc });
                    centers[j] = points[far];
                }
            }
        }

        for (i, point) in points.iter().enumerate() {
            labels[i] = nearest(*point, &centers).0;
        }
        fill_empty_clusters(points, &mut labels, &mut centers);

        let inertia = points
            .iter()
            .zip(&labels)
            .map(|(p, l)| squared_distance(*p, centers[*l]))
            .sum();
        KMeansFit { labels, centers, inertia }
    }
}

/// Give every empty cluster the point farthest from its center, taken from a
/// cluster with more than one member.
fn fill_empty_clusters(points: &[Coord<f64>], labels: &mut [usize], centers: &mut [Coord<f64>]) {
    let k = centers.len();
    let mut counts = vec![0usize; k];
    for label in labels.iter() {
        counts[*label] += 1;
    }

    for j in 0..k {
        if counts[j] > 0 {
            continue;
        }
        let farthest = points
            .iter()
            .zip(labels.iter())
            .enumerate()
            .filter(|(_, (_, l))| counts[**l] > 1)
            .map(|(i, (p, l))| (i, squared_distance(*p, centers[*l])))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        let Some((i, _)) = farthest else {
            break;
        };
        counts[labels[i]] -= 1;
        counts[j] = 1;
        labels[i] = j;
        centers[j] = points[i];
    }
}

/// Akaike information criterion of a k-cluster fit with the given WCSS.
pub fn aic(wcss: f64, n: usize, k: usize) -> f64 {
    let n = n as f64;
    let log_likelihood = 0.5 * (-n * ((2.0 * PI).ln() + 1.0 - n.ln() + wcss.ln()));
    -2.0 * log_likelihood + 2.0 * (k as f64 + 1.0)
}

/// Cluster count at the elbow of an AIC curve, where `scores[i]` is the AIC
/// for `i + 1` clusters: the largest k whose AIC is strictly below that of
/// k - 1, or 1 if the curve never decreases.
pub fn elbow(scores: &[f64]) -> usize {
    scores
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[1] < w[0])
        .map(|(i, _)| i + 2)
        .last()
        .unwrap_or(1)
}

/// Pick a cluster count for the points by sweeping k = 1 .. max_clusters - 1.
///
/// Candidates are capped below the number of points so the WCSS stays
/// positive; a fit that reaches zero WCSS anyway ends the sweep and is taken.
pub fn choose_cluster_count(points: &[Coord<f64>], max_clusters: usize) -> usize {
    let n = points.len();
    let max_k = max_clusters.saturating_sub(1).min(n.saturating_sub(1));
    if max_k <= 1 {
        return 1;
    }

    let mut scores = Vec::with_capacity(max_k);
    for k in 1..=max_k {
        let fit = KMeans::new(k).with_seed(SWEEP_SEED).fit(points);
        if fit.inertia <= 0.0 {
            debug!("k = {} fits the centroids exactly", k);
            return k;
        }
        let score = aic(fit.inertia, n, k);
        debug!("k = {}: WCSS {:.6e}, AIC {:.3}", k, fit.inertia, score);
        scores.push(score);
    }
    elbow(&scores)
}

/// Replace the members of a set by at most `max_clusters - 1` convex hulls.
///
/// With `max_clusters <= 1` or a single member the whole set collapses to
/// its own hull. The source set is left untouched.
pub fn cluster_polygons(set: &PolygonSet, max_clusters: usize) -> PolygonSet {
    if set.is_empty() {
        return set.clone();
    }
    if max_clusters <= 1 || set.len() == 1 {
        let hull = oriented_hull(&set.to_multi_polygon());
        return PolygonSet::new(vec![hull], set.crs().clone());
    }

    let members: Vec<(&Polygon<f64>, Coord<f64>)> = set
        .iter()
        .filter_map(|p| p.centroid().map(|c| (p, c.0)))
        .collect();
    let centroids: Vec<Coord<f64>> = members.iter().map(|(_, c)| *c).collect();

    let k = choose_cluster_count(&centroids, max_clusters);
    info!("Clustering {} polygons into {} regions", set.len(), k);

    let fit = KMeans::new(k)
        .with_seed(FINAL_SEED)
        .with_max_iter(FINAL_MAX_ITER)
        .fit(&centroids);

    let mut groups: Vec<Vec<Polygon<f64>>> = vec![Vec::new(); k];
    for ((polygon, _), label) in members.iter().zip(&fit.labels) {
        groups[*label].push((*polygon).clone());
    }

    let hulls = groups
        .into_iter()
        .map(|group| oriented_hull(&MultiPolygon::new(group)))
        .collect();
    PolygonSet::new(hulls, set.crs().clone())
}
