use serde::{Deserialize, Serialize};

/// Nudges exact boundary fractions into the following section.
const EPSILON: f64 = f64::EPSILON;

/// Weight of one section for progress purposes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SectionWeight {
    /// `false` for sections marked `linear="no"`.
    pub linear: bool,
    pub size: f64,
}

impl SectionWeight {
    pub fn new(linear: bool, size: f64) -> Self {
        Self { linear, size }
    }

    pub fn effective(&self) -> f64 {
        if self.linear && self.size > 0.0 {
            self.size
        } else {
            0.0
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub current: usize,
    pub total: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationCounter {
    pub current: usize,
    pub next: usize,
    pub total: usize,
}

/// Remaining reading time, in time units, for the section and the book.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeEstimate {
    pub section: f64,
    pub total: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub fraction: f64,
    pub section: Counter,
    pub location: LocationCounter,
    pub time: TimeEstimate,
}

/// Maps between whole-book fractions and `(section, fraction in section)`,
/// weighted by section byte size.
#[derive(Clone, Debug)]
pub struct SectionProgress {
    sizes: Vec<f64>,
    size_per_loc: f64,
    size_per_time_unit: f64,
    size_total: f64,
    section_fractions: Vec<f64>,
}

impl SectionProgress {
    pub fn new(sections: &[SectionWeight], size_per_loc: f64, size_per_time_unit: f64) -> Self {
        let sizes: Vec<f64> = sections.iter().map(SectionWeight::effective).collect();
        let size_total: f64 = sizes.iter().sum();

        let mut section_fractions = Vec::with_capacity(sizes.len() + 1);
        let mut sum = 0.0;
        section_fractions.push(0.0);
        for size in &sizes {
            sum += size;
            section_fractions.push(if size_total > 0.0 { sum / size_total } else { 0.0 });
        }
        // Pin the last boundary so float accumulation cannot leave it short of 1.
        if size_total > 0.0 {
            if let Some(last) = section_fractions.last_mut() {
                *last = 1.0;
            }
        }

        Self {
            sizes,
            size_per_loc,
            size_per_time_unit,
            size_total,
            section_fractions,
        }
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn size_total(&self) -> f64 {
        self.size_total
    }

    /// Cumulative boundary fractions, one more than the number of sections.
    pub fn section_fractions(&self) -> &[f64] {
        &self.section_fractions
    }

    pub fn get_progress(&self, index: usize, fraction_in_section: f64, page_fraction: f64) -> Progress {
        let index = index.min(self.sizes.len().saturating_sub(1));
        let size_in_section = self.sizes.get(index).copied().unwrap_or(0.0);
        let size_before: f64 = self.sizes.iter().take(index).sum();
        let size = size_before + fraction_in_section * size_in_section;
        let next_size = size + page_fraction * size_in_section;
        let remaining_total = self.size_total - size;
        let remaining_section = (1.0 - fraction_in_section) * size_in_section;

        Progress {
            fraction: if self.size_total > 0.0 {
                next_size / self.size_total
            } else {
                0.0
            },
            section: Counter {
                current: index,
                total: self.sizes.len(),
            },
            location: LocationCounter {
                current: (size / self.size_per_loc).floor() as usize,
                next: (next_size / self.size_per_loc).floor() as usize,
                total: (self.size_total / self.size_per_loc).ceil() as usize,
            },
            time: TimeEstimate {
                section: remaining_section / self.size_per_time_unit,
                total: remaining_total / self.size_per_time_unit,
            },
        }
    }

    /// Resolves a whole-book fraction to a section and a fraction within it.
    ///
    /// Zero-weight sections are never returned for interior fractions; the
    /// endpoints clamp to `(0, 0)` and `(last, 1)` without skipping.
    pub fn get_section(&self, fraction: f64) -> (usize, f64) {
        let last = self.sizes.len().saturating_sub(1);
        if fraction <= 0.0 {
            return (0, 0.0);
        }
        if fraction >= 1.0 {
            return (last, 1.0);
        }
        if self.size_total <= 0.0 {
            return (0, 0.0);
        }
        let fraction = fraction + EPSILON;
        let Some(boundary) = self.section_fractions.iter().position(|&x| x > fraction) else {
            return (last, 1.0);
        };
        let mut index = boundary.saturating_sub(1);
        while self.sizes[index] == 0.0 {
            index += 1;
            if index > last {
                return (last, 1.0);
            }
        }
        let start = self.section_fractions[index];
        let fraction_in_section = (fraction - start) / (self.sizes[index] / self.size_total);
        (index, fraction_in_section.clamp(0.0, 1.0))
    }
}
