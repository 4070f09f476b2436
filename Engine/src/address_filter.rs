//! Code-region discovery: decides which addresses belong to the target's own code.

/// Name of the section that holds the target's main code.
pub const PRIMARY_CODE_SECTION: &str = ".text";

/// A section of a loaded image, as reported by the instrumentation host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub executable: bool,
}

impl Section {
    pub fn new(name: impl Into<String>, base: u64, size: u64, executable: bool) -> Self {
        Self {
            name: name.into(),
            base,
            size,
            executable,
        }
    }

    /// Whether this section is part of the target's primary code.
    /// Sections mapped at address zero are not loaded and never qualify.
    pub fn is_primary_code(&self) -> bool {
        self.executable && self.name == PRIMARY_CODE_SECTION && self.base != 0
    }
}

/// Inclusive bounds of the tracked code. `base == limit == 0` means nothing was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeRegion {
    pub base: u64,
    pub limit: u64,
}

impl CodeRegion {
    pub fn is_empty(&self) -> bool {
        self.base == 0 && self.limit == 0
    }
}

/// Tracks the union of every qualifying section seen during a run.
///
/// The region only ever grows: each qualifying section lowers `base` or raises
/// `limit`, it never replaces the bounds found earlier.
#[derive(Debug, Clone, Default)]
pub struct AddressSpaceFilter {
    region: CodeRegion,
}

impl AddressSpaceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union the bounds of all qualifying sections into the region.
    /// Returns the number of sections that qualified in this call.
    pub fn discover<'a, I>(&mut self, sections: I) -> usize
    where
        I: IntoIterator<Item = &'a Section>,
    {
        let mut matched = 0;
        for section in sections {
            if !section.is_primary_code() {
                continue;
            }
            let high = section.base.saturating_add(section.size);
            log::info!(
                "code section {} at {:#x} (size {:#x})",
                section.name,
                section.base,
                section.size
            );

            if self.region.is_empty() {
                self.region = CodeRegion {
                    base: section.base,
                    limit: high,
                };
            } else {
                self.region.base = self.region.base.min(section.base);
                self.region.limit = self.region.limit.max(high);
            }
            matched += 1;
        }

        if matched > 0 {
            log::info!(
                "code region {:#x}..={:#x}",
                self.region.base,
                self.region.limit
            );
        }
        matched
    }

    #[inline]
    pub fn is_within(&self, addr: u64) -> bool {
        !self.region.is_empty() && self.region.base <= addr && addr <= self.region.limit
    }

    pub fn region(&self) -> CodeRegion {
        self.region
    }

    pub fn has_region(&self) -> bool {
        !self.region.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(base: u64, size: u64) -> Section {
        Section::new(".text", base, size, true)
    }

    #[test]
    fn empty_filter_admits_nothing() {
        let filter = AddressSpaceFilter::new();
        assert!(!filter.has_region());
        assert!(!filter.is_within(0));
        assert!(!filter.is_within(0x1000));
        assert!(!filter.is_within(u64::MAX));
    }

    #[test]
    fn ignores_non_matching_sections() {
        let mut filter = AddressSpaceFilter::new();
        let sections = [
            Section::new(".plt", 0x1000, 0x100, true),
            Section::new(".text", 0x2000, 0x100, false),
            Section::new(".data", 0x3000, 0x100, false),
            Section::new(".text", 0, 0x100, true),
        ];
        assert_eq!(filter.discover(&sections), 0);
        assert_eq!(filter.region(), CodeRegion::default());
        assert!(!filter.is_within(0x1000));
        assert!(!filter.is_within(0));
    }

    #[test]
    fn bounds_are_inclusive_and_tight() {
        let mut filter = AddressSpaceFilter::new();
        filter.discover(&[text(0x1000, 0x100)]);

        assert_eq!(
            filter.region(),
            CodeRegion {
                base: 0x1000,
                limit: 0x1100
            }
        );
        assert!(filter.is_within(0x1000));
        assert!(filter.is_within(0x1080));
        assert!(filter.is_within(0x1100));
        assert!(!filter.is_within(0x0fff));
        assert!(!filter.is_within(0x1101));
    }

    #[test]
    fn multiple_sections_expand_the_region() {
        let mut filter = AddressSpaceFilter::new();
        assert_eq!(filter.discover(&[text(0x5000, 0x100)]), 1);
        // a lower section must lower base without dropping the earlier limit
        assert_eq!(filter.discover(&[text(0x2000, 0x10)]), 1);
        assert_eq!(filter.region().base, 0x2000);
        assert_eq!(filter.region().limit, 0x5100);

        // a section inside the region changes nothing
        filter.discover(&[text(0x3000, 0x10)]);
        assert_eq!(filter.region().base, 0x2000);
        assert_eq!(filter.region().limit, 0x5100);

        assert!(!filter.is_within(0x1fff));
        assert!(!filter.is_within(0x5101));
    }

    #[test]
    fn limit_saturates_at_top_of_address_space() {
        let mut filter = AddressSpaceFilter::new();
        filter.discover(&[text(u64::MAX - 0x10, 0x100)]);
        assert_eq!(filter.region().limit, u64::MAX);
        assert!(filter.is_within(u64::MAX));
    }
}
