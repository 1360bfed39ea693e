//! Allocation of page versions inside a page map file.
//!
//! Pages are laid out one after another. Once the file reached its maximum
//! size and the last window was written, allocation wraps around and starts
//! reusing windows from the beginning of the file, so the oldest page
//! versions are overwritten first.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{PageWindow, WindowKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowSlot {
    /// `None` for a window that holds no valid page.
    key: Option<WindowKey>,
    offset: u64,
    size: u64,
}

/// Tracks where each stored page version lives in a page map file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageWindowManager {
    windows: Vec<WindowSlot>,
    /// Index of the most recently allocated window.
    index_pointer: Option<usize>,
    total_size: u64,
    max_size: u64,
    /// Key to window position. Rebuilt lazily after windows move.
    #[serde(skip)]
    index: Option<HashMap<WindowKey, usize>>,
}

impl PageWindowManager {
    /// Creates a manager for a file of at most `max_size` bytes
    /// (0 = unbounded).
    pub fn new(max_size: u64) -> Self {
        Self {
            windows: Vec::new(),
            index_pointer: None,
            total_size: 0,
            max_size,
            index: None,
        }
    }

    fn window_index(&mut self, key: &WindowKey) -> Option<usize> {
        let windows = &self.windows;
        self.index
            .get_or_insert_with(|| {
                windows
                    .iter()
                    .enumerate()
                    .filter_map(|(i, w)| w.key.map(|k| (k, i)))
                    .collect()
            })
            .get(key)
            .copied()
    }

    fn invalidate_index(&mut self) {
        self.index = None;
    }

    /// Moves the pointer to the next window, wrapping to the start of the
    /// file once the maximum size is reached at the last window.
    fn increment_index_pointer(&mut self) -> usize {
        let next = match self.index_pointer {
            Some(p)
                if self.max_size > 0
                    && self.total_size >= self.max_size
                    && p + 1 == self.windows.len() =>
            {
                0
            }
            Some(p) => p + 1,
            None => 0,
        };
        self.index_pointer = Some(next);
        next
    }

    fn window_file_offset(&self, index: usize) -> u64 {
        if index > 0 {
            let previous = &self.windows[index - 1];
            previous.offset + previous.size
        } else {
            0
        }
    }

    /// Shrinks the window to `size`. The rest becomes an empty window, or is
    /// given back to the file if this is the last window.
    fn split_window(&mut self, index: usize, size: u64) {
        let delta = self.windows[index].size - size;

        if index == self.windows.len() - 1 {
            // accounting only: the file keeps its length, the tail is
            // overwritten by later pages
            self.total_size -= delta;
            self.windows[index].size = size;
        } else if delta != 0 {
            self.windows[index].size = size;
            let offset = self.windows[index].offset + size;
            self.windows.insert(
                index + 1,
                WindowSlot {
                    key: None,
                    offset,
                    size: delta,
                },
            );
        }

        self.invalidate_index();
    }

    fn merge_window_with_next(&mut self, index: usize) {
        if index + 1 < self.windows.len() {
            let next = self.windows.remove(index + 1);
            self.windows[index].size += next.size;
            self.invalidate_index();
        }
    }

    /// Resizes the window, merging with following windows when it is too
    /// small and splitting when it is too big.
    fn adjust_window_size(&mut self, index: usize, size: u64) {
        if index == self.windows.len() - 1 {
            let window = &mut self.windows[index];
            self.total_size = self.total_size - window.size + size;
            window.size = size;
        } else {
            while self.windows[index].size < size && index + 1 < self.windows.len() {
                self.merge_window_with_next(index);
            }

            let window = &mut self.windows[index];
            if window.size < size {
                // Merged up to the end of the file.
                self.total_size += size - window.size;
                window.size = size;
            } else {
                self.split_window(index, size);
            }
        }

        self.windows[index].key = None;
        self.invalidate_index();
    }

    fn allocate_page_window(&mut self, index: usize, size: u64) {
        if index == self.windows.len() {
            let offset = self.window_file_offset(index);
            self.total_size += size;
            self.windows.push(WindowSlot {
                key: None,
                offset,
                size,
            });
        } else if self.windows[index].size != size {
            self.adjust_window_size(index, size);
        }
    }

    fn public_window(&self, index: usize) -> Option<PageWindow> {
        let window = &self.windows[index];
        window.key.map(|key| PageWindow {
            page_id: key.page_id,
            version_number: key.version_number,
            ajax_version_number: key.ajax_version_number,
            file_part_offset: window.offset,
            file_part_size: window.size,
        })
    }

    /// Window positions from the most recently allocated one backwards.
    fn recent_order(&self) -> impl Iterator<Item = usize> {
        let len = self.windows.len();
        let split = match self.index_pointer {
            Some(p) if len > 0 => p.min(len - 1) + 1,
            _ => 0,
        };
        (0..split).rev().chain((split..len).rev())
    }

    /// Allocates a window for a page version of `size` bytes.
    ///
    /// If the same version is already stored, its old window is invalidated.
    /// The allocation may overwrite the oldest pages in the file.
    pub fn create_page_window(
        &mut self,
        page_id: i32,
        version_number: i32,
        ajax_version_number: i32,
        size: u64,
    ) -> PageWindow {
        let key = WindowKey::new(page_id, version_number, ajax_version_number);

        let existing = self.window_index(&key);
        if let Some(i) = existing {
            self.windows[i].key = None;
            self.invalidate_index();
        }

        // reuse the old window only if it is the one under the pointer
        let index = match existing {
            Some(i) if Some(i) == self.index_pointer => i,
            _ => self.increment_index_pointer(),
        };

        self.allocate_page_window(index, size);
        self.windows[index].key = Some(key);
        self.invalidate_index();

        PageWindow {
            page_id,
            version_number,
            ajax_version_number,
            file_part_offset: self.windows[index].offset,
            file_part_size: size,
        }
    }

    /// Looks up the window of a stored page version.
    ///
    /// `version_number == -1` selects the most recently stored version of the
    /// page; `ajax_version_number == -1` the most recently stored ajax version
    /// of the selected version.
    pub fn get_page_window(
        &mut self,
        page_id: i32,
        version_number: i32,
        ajax_version_number: i32,
    ) -> Option<PageWindow> {
        if version_number != -1 && ajax_version_number != -1 {
            let key = WindowKey::new(page_id, version_number, ajax_version_number);
            return self
                .window_index(&key)
                .and_then(|index| self.public_window(index));
        }

        self.recent_order()
            .filter_map(|index| self.public_window(index))
            .find(|window| {
                window.page_id == page_id
                    && (version_number == -1 || window.version_number == version_number)
                    && (ajax_version_number == -1
                        || window.ajax_version_number == ajax_version_number)
            })
    }

    /// Removes every stored version of a page.
    pub fn remove_page(&mut self, page_id: i32) {
        let mut index = self.windows.len();
        while index > 0 {
            index -= 1;
            let matches = self.windows[index]
                .key
                .map(|key| key.page_id == page_id)
                .unwrap_or(false);
            if !matches {
                continue;
            }

            if index == self.windows.len() - 1 {
                // the page map file is not truncated
                let window = self.windows.remove(index);
                self.total_size -= window.size;
                if self.index_pointer == Some(index) {
                    self.index_pointer = index.checked_sub(1);
                }
            } else {
                self.windows[index].key = None;
            }
        }
        self.invalidate_index();
    }

    /// Returns up to `count` windows, most recently stored first.
    pub fn last_page_windows(&self, count: usize) -> Vec<PageWindow> {
        self.recent_order()
            .filter_map(|index| self.public_window(index))
            .take(count)
            .collect()
    }

    /// All windows holding a page, in file order.
    pub fn page_windows(&self) -> Vec<PageWindow> {
        (0..self.windows.len())
            .filter_map(|index| self.public_window(index))
            .collect()
    }

    /// Bytes covered by windows. This is what size limits are checked
    /// against; the page map file itself may be longer after trailing
    /// windows shrank or were removed.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_are_laid_out_sequentially() {
        let mut manager = PageWindowManager::new(1000);
        let a = manager.create_page_window(1, 0, 0, 100);
        let b = manager.create_page_window(2, 0, 0, 50);
        let c = manager.create_page_window(1, 1, 0, 25);

        assert_eq!(a.file_part_offset, 0);
        assert_eq!(b.file_part_offset, 100);
        assert_eq!(c.file_part_offset, 150);
        assert_eq!(manager.total_size(), 175);
    }

    #[test]
    fn test_wraps_around_after_max_size() {
        let mut manager = PageWindowManager::new(100);
        manager.create_page_window(1, 0, 0, 60);
        manager.create_page_window(2, 0, 0, 60);
        let third = manager.create_page_window(3, 0, 0, 60);

        assert_eq!(third.file_part_offset, 0);
        assert!(manager.get_page_window(1, 0, 0).is_none());
        assert!(manager.get_page_window(2, 0, 0).is_some());
        assert_eq!(manager.total_size(), 120);
    }

    #[test]
    fn test_reused_window_is_merged_and_split() {
        let mut manager = PageWindowManager::new(100);
        manager.create_page_window(1, 0, 0, 40);
        manager.create_page_window(2, 0, 0, 40);
        manager.create_page_window(3, 0, 0, 40);

        // wraps: takes the space of pages 1 and 2, leaves a 10 byte gap
        let fourth = manager.create_page_window(4, 0, 0, 70);
        assert_eq!(fourth.file_part_offset, 0);
        assert!(manager.get_page_window(1, 0, 0).is_none());
        assert!(manager.get_page_window(2, 0, 0).is_none());
        assert_eq!(manager.get_page_window(3, 0, 0).unwrap().file_part_offset, 80);
        assert_eq!(manager.total_size(), 120);

        let fifth = manager.create_page_window(5, 0, 0, 10);
        assert_eq!(fifth.file_part_offset, 70);
        assert_eq!(manager.total_size(), 120);
    }

    #[test]
    fn test_version_wildcards_pick_most_recent() {
        let mut manager = PageWindowManager::new(0);
        manager.create_page_window(1, 0, 0, 10);
        manager.create_page_window(1, 0, 1, 10);
        manager.create_page_window(1, 1, 0, 10);
        manager.create_page_window(2, 0, 0, 10);

        let latest = manager.get_page_window(1, -1, -1).unwrap();
        assert_eq!((latest.version_number, latest.ajax_version_number), (1, 0));

        let latest_ajax = manager.get_page_window(1, 0, -1).unwrap();
        assert_eq!(latest_ajax.ajax_version_number, 1);

        assert!(manager.get_page_window(1, 2, -1).is_none());
        assert!(manager.get_page_window(3, -1, -1).is_none());
    }

    #[test]
    fn test_saving_same_version_again_replaces_window() {
        let mut manager = PageWindowManager::new(0);
        manager.create_page_window(1, 0, 0, 10);
        manager.create_page_window(2, 0, 0, 10);
        let again = manager.create_page_window(1, 0, 0, 30);

        assert_eq!(again.file_part_offset, 20);
        assert_eq!(manager.get_page_window(1, 0, 0), Some(again));
        assert_eq!(manager.page_windows().len(), 2);
    }

    #[test]
    fn test_remove_page_releases_trailing_space() {
        let mut manager = PageWindowManager::new(0);
        manager.create_page_window(1, 0, 0, 10);
        manager.create_page_window(2, 0, 0, 20);
        manager.create_page_window(2, 1, 0, 30);

        manager.remove_page(2);
        assert!(manager.get_page_window(2, -1, -1).is_none());
        // the last window is dropped, the inner one only emptied
        assert_eq!(manager.total_size(), 30);

        let next = manager.create_page_window(3, 0, 0, 5);
        assert_eq!(next.file_part_offset, 10);
    }

    #[test]
    fn test_last_page_windows_order() {
        let mut manager = PageWindowManager::new(0);
        for id in 1..=4 {
            manager.create_page_window(id, 0, 0, 10);
        }
        let ids: Vec<i32> = manager
            .last_page_windows(3)
            .iter()
            .map(|w| w.page_id)
            .collect();
        assert_eq!(ids, vec![4, 3, 2]);
    }

    #[test]
    fn test_index_survives_persistence() {
        let mut manager = PageWindowManager::new(0);
        manager.create_page_window(7, 3, 1, 42);
        let json = serde_json::to_string(&manager).unwrap();
        let mut restored: PageWindowManager = serde_json::from_str(&json).unwrap();
        let window = restored.get_page_window(7, 3, 1).unwrap();
        assert_eq!(window.file_part_size, 42);
        assert_eq!(restored.total_size(), 42);
    }
}
