// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Inference output sliced into pages: one global, one per interval

use serde::Serialize;

pub const VALUES_PER_PAGE: usize = 4;

/// Values an engine must produce for `intervals` recorded intervals
pub fn expected_values(intervals: usize) -> usize {
    VALUES_PER_PAGE * (intervals + 1)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsPage {
    /// `GLOBAL` or `E<n>`
    pub label: String,
    pub title: String,
    pub values: [f64; VALUES_PER_PAGE],
}

impl ResultsPage {
    /// `val<i>: 0.000` lines for the display
    pub fn value_lines(&self) -> [String; VALUES_PER_PAGE] {
        let mut lines: [String; VALUES_PER_PAGE] = Default::default();
        for (i, value) in self.values.iter().enumerate() {
            lines[i] = format!("val{}: {:.3}", i + 1, value);
        }
        lines
    }
}

/// Slice a raw output vector into pages. Short output is padded with zeros,
/// extra values are ignored and everything is clamped to [0, 1].
pub fn build_pages(raw: &[f64], intervals: usize) -> Vec<ResultsPage> {
    (0..=intervals)
        .map(|page| {
            let mut values = [0.0; VALUES_PER_PAGE];
            for (i, slot) in values.iter_mut().enumerate() {
                if let Some(v) = raw.get(page * VALUES_PER_PAGE + i) {
                    *slot = clamp_unit(*v);
                }
            }
            let (label, title) = if page == 0 {
                ("GLOBAL".to_string(), "GLOBAL RESULTS".to_string())
            } else {
                (format!("E{}", page), format!("EVENT {} RESULTS", page))
            };
            ResultsPage { label, title, values }
        })
        .collect()
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Page cursor; left/right stop at the ends
#[derive(Debug, Clone, Default)]
pub struct ResultsView {
    pages: Vec<ResultsPage>,
    index: usize,
}

impl ResultsView {
    pub fn new(pages: Vec<ResultsPage>) -> Self {
        Self { pages, index: 0 }
    }

    pub fn pages(&self) -> &[ResultsPage] {
        &self.pages
    }

    pub fn current(&self) -> Option<&ResultsPage> {
        self.pages.get(self.index)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn has_prev(&self) -> bool {
        self.index > 0
    }

    pub fn has_next(&self) -> bool {
        self.index + 1 < self.pages.len()
    }

    pub fn next(&mut self) -> bool {
        if self.has_next() {
            self.index += 1;
            true
        } else {
            false
        }
    }

    pub fn prev(&mut self) -> bool {
        if self.has_prev() {
            self.index -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_slice_and_clamp() {
        let raw = [0.1, 0.2, 1.4, -0.3, 0.5, 0.6, 0.7, 0.8];
        let pages = build_pages(&raw, 1);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].title, "GLOBAL RESULTS");
        assert_eq!(pages[0].values, [0.1, 0.2, 1.0, 0.0]);
        assert_eq!(pages[1].label, "E1");
        assert_eq!(pages[1].title, "EVENT 1 RESULTS");
        assert_eq!(pages[1].values, [0.5, 0.6, 0.7, 0.8]);
    }

    #[test]
    fn test_short_output_is_padded() {
        let pages = build_pages(&[0.9, f64::NAN], 2);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].values, [0.9, 0.0, 0.0, 0.0]);
        assert_eq!(pages[2].values, [0.0; 4]);
        assert_eq!(expected_values(2), 12);
    }

    #[test]
    fn test_paging_stops_at_ends() {
        let mut view = ResultsView::new(build_pages(&[], 1));
        assert!(!view.has_prev());
        assert!(!view.prev());
        assert!(view.next());
        assert!(!view.next());
        assert_eq!(view.index(), 1);
        assert_eq!(view.current().map(|p| p.label.as_str()), Some("E1"));
        assert_eq!(view.current().unwrap().value_lines()[0], "val1: 0.000");
    }
}
