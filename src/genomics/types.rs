use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Raw value htslib uses to pad genotype vectors of samples with lower ploidy.
pub const GT_VECTOR_END: i32 = i32::MIN + 1;

/// A single genotype call in BCF encoding: `(allele + 1) << 1 | phased`, with
/// `0`/`1` meaning a missing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenotypeCall(i32);

impl GenotypeCall {
    /// Wrap a raw BCF-encoded genotype value.
    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Encode a called allele.
    pub fn called(allele: u32, phased: bool) -> Self {
        Self((((allele as i32) + 1) << 1) | phased as i32)
    }

    /// Encode a missing call.
    pub fn missing() -> Self {
        Self(0)
    }

    /// Raw BCF encoding.
    pub fn raw(self) -> i32 {
        self.0
    }

    /// Whether the call is missing (`.` in VCF).
    pub fn is_missing(self) -> bool {
        (self.0 >> 1) == 0
    }

    /// Whether the call is phased with respect to the previous call.
    pub fn is_phased(self) -> bool {
        self.0 & 1 == 1
    }

    /// Index of the called allele (`0` is the reference), or `None` when missing.
    pub fn allele(self) -> Option<usize> {
        if self.is_missing() || self.0 == GT_VECTOR_END {
            None
        } else {
            Some(((self.0 >> 1) - 1) as usize)
        }
    }
}

/// Genomic coordinate pair used to key per-locus statistics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locus {
    /// Contig/chromosome name.
    pub contig: Arc<str>,
    /// Position on the contig.
    pub pos: u32,
}

impl Locus {
    /// Construct a new locus.
    pub fn new(contig: impl Into<Arc<str>>, pos: u32) -> Self {
        Self {
            contig: contig.into(),
            pos,
        }
    }
}

impl fmt::Display for Locus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.contig, self.pos)
    }
}

/// One variant record of a single sample, as produced by a record source.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    /// Contig/chromosome name.
    pub contig: Arc<str>,
    /// 0-based start position.
    pub start: u32,
    /// 0-based inclusive end position (differs from `start` for long variants
    /// and reference blocks).
    pub end: u32,
    /// Alleles, reference first.
    pub alleles: Vec<Arc<str>>,
    /// BCF-encoded genotype calls for the sample.
    pub genotypes: Vec<i32>,
    /// Whether the record passed all filters.
    pub filter_pass: bool,
}

impl VariantRecord {
    /// Construct a new record; filters default to `PASS`.
    pub fn new<A>(
        contig: impl Into<Arc<str>>,
        start: u32,
        end: u32,
        alleles: impl IntoIterator<Item = A>,
        genotypes: Vec<GenotypeCall>,
    ) -> Self
    where
        A: Into<Arc<str>>,
    {
        Self {
            contig: contig.into(),
            start,
            end: end.max(start),
            alleles: alleles.into_iter().map(Into::into).collect(),
            genotypes: genotypes.into_iter().map(GenotypeCall::raw).collect(),
            filter_pass: true,
        }
    }

    /// Set the filter status.
    pub fn with_filter_pass(mut self, pass: bool) -> Self {
        self.filter_pass = pass;
        self
    }

    /// Locus of the record start.
    pub fn locus(&self) -> Locus {
        Locus::new(Arc::clone(&self.contig), self.start)
    }

    /// Allele string for an allele index.
    pub fn allele(&self, idx: usize) -> Option<&str> {
        self.alleles.get(idx).map(|a| a.as_ref())
    }

    /// Number of reference bases spanned by the record, saturating at `u32::MAX`.
    pub fn span(&self) -> u32 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }

    /// Decode the genotype calls into `dst`, returning the number of calls.
    ///
    /// `dst` is cleared but keeps its allocation, so a buffer reused across
    /// records only grows when a record carries more calls than any before it.
    pub fn genotypes_into(&self, dst: &mut Vec<i32>) -> usize {
        dst.clear();
        dst.extend(
            self.genotypes
                .iter()
                .copied()
                .filter(|&raw| raw != GT_VECTOR_END),
        );
        dst.len()
    }
}

/// Stable enumeration of the contigs of a dataset.
///
/// Merge ordering uses the rank of a contig in this enumeration rather than
/// the lexical order of its name.
#[derive(Debug, Clone, Default)]
pub struct ContigOrder {
    names: Vec<Arc<str>>,
    ranks: HashMap<Arc<str>, u32>,
}

impl ContigOrder {
    /// Enumerate contigs in the declared order; duplicates keep their first rank.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let mut order = Self::default();
        for name in names {
            order.push(name);
        }
        order
    }

    /// Enumerate contigs in lexical order, matching a string dimension domain.
    pub fn lexicographic<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let mut names: Vec<Arc<str>> = names.into_iter().map(Into::into).collect();
        names.sort();
        Self::new(names)
    }

    /// Append a contig, returning its rank.
    pub fn push(&mut self, name: impl Into<Arc<str>>) -> u32 {
        let name = name.into();
        if let Some(&rank) = self.ranks.get(&name) {
            return rank;
        }
        let rank = self.names.len() as u32;
        self.ranks.insert(Arc::clone(&name), rank);
        self.names.push(name);
        rank
    }

    /// Rank of a contig, if known.
    pub fn rank(&self, name: &str) -> Option<u32> {
        self.ranks.get(name).copied()
    }

    /// Contig name at a rank.
    pub fn name(&self, rank: u32) -> Option<&str> {
        self.names.get(rank as usize).map(|n| n.as_ref())
    }

    /// Number of contigs.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no contigs are known.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Contig names in rank order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|n| n.as_ref())
    }
}
