//! Allocator configuration.

#[cfg(feature = "enable-serde")]
use serde_derive::{Deserialize, Serialize};

/// Possible colouring engines to use for register allocation.
///
/// This is used as an argument to the [`Config::strategy`] method.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Strategy {
    /// Iterated graph colouring with optimistic spilling.
    ///
    /// This produces the tightest register assignment and is the default.
    GraphColouring,

    /// Linear scan over live intervals.
    ///
    /// Faster than graph colouring on large shaders. Spilled intervals are
    /// split in place so most programs finish in a single pass. Secondary
    /// update programs always use graph colouring regardless of this setting.
    LinearScan,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::GraphColouring
    }
}

/// Global configuration options used to drive register allocation.
///
/// The default values describe a mid-sized USSE-style core: 32 primary
/// attributes, 16 outputs, 3 internal registers and 64 temporaries.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Config {
    pub(crate) strategy: Strategy,
    pub(crate) prim_attrs: u32,
    pub(crate) outputs: u32,
    pub(crate) internals: u32,
    pub(crate) temps: u32,
    pub(crate) post_split_temps: Option<u32>,
    pub(crate) prim_attrs_writable: bool,
    pub(crate) max_immediate_offset: u32,
    pub(crate) spill_sec_attr_base: u32,
    pub(crate) spill_sec_attrs: u32,
    pub(crate) max_iterations: u32,
    pub(crate) verify: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            prim_attrs: 32,
            outputs: 16,
            internals: 3,
            temps: 64,
            post_split_temps: None,
            prim_attrs_writable: false,
            max_immediate_offset: 64,
            spill_sec_attr_base: 96,
            spill_sec_attrs: 4,
            max_iterations: 64,
            verify: cfg!(debug_assertions),
        }
    }
}

impl Config {
    /// Creates a new configuration object with the default configuration
    /// specified.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures which colouring engine is used for main programs.
    pub fn strategy(&mut self, strategy: Strategy) -> &mut Self {
        self.strategy = strategy;
        self
    }

    /// Number of hardware primary attribute registers.
    ///
    /// Primary attributes above the ones a program declares as inputs are
    /// available to temporaries when [`Config::prim_attrs_writable`] is set.
    pub fn prim_attrs(&mut self, count: u32) -> &mut Self {
        self.prim_attrs = count;
        self
    }

    /// Number of hardware output registers.
    pub fn outputs(&mut self, count: u32) -> &mut Self {
        self.outputs = count;
        self
    }

    /// Number of internal (GPI) registers. These are never spilled.
    pub fn internals(&mut self, count: u32) -> &mut Self {
        self.internals = count;
        self
    }

    /// Number of hardware temporary registers.
    pub fn temps(&mut self, count: u32) -> &mut Self {
        self.temps = count;
        self
    }

    /// Restricts nodes that are live after the program's split point to the
    /// first `count` temporaries.
    ///
    /// `None` (the default) applies the full temporary budget to both regions.
    pub fn post_split_temps(&mut self, count: Option<u32>) -> &mut Self {
        self.post_split_temps = count;
        self
    }

    /// Whether instructions may write primary attribute registers.
    ///
    /// When disabled, primary attributes are read-only and no destination
    /// operand can be coloured into that bank.
    pub fn prim_attrs_writable(&mut self, enable: bool) -> &mut Self {
        self.prim_attrs_writable = enable;
        self
    }

    /// Largest scratch area, in bytes, whose offsets still fit the immediate
    /// field of the scratch memory instructions.
    pub fn max_immediate_offset(&mut self, bytes: u32) -> &mut Self {
        self.max_immediate_offset = bytes;
        self
    }

    /// Secondary attribute registers available to hold spill offsets once the
    /// scratch area outgrows immediates. The range starts at `base`.
    pub fn spill_sec_attrs(&mut self, base: u32, count: u32) -> &mut Self {
        self.spill_sec_attr_base = base;
        self.spill_sec_attrs = count;
        self
    }

    /// Upper bound on colouring attempts before allocation gives up.
    pub fn max_iterations(&mut self, limit: u32) -> &mut Self {
        self.max_iterations = limit;
        self
    }

    /// Run the assignment verifier after colouring succeeds.
    ///
    /// This is enabled by default in debug builds.
    pub fn verify(&mut self, enable: bool) -> &mut Self {
        self.verify = enable;
        self
    }

    /// Returns the configured colouring engine.
    pub fn get_strategy(&self) -> Strategy {
        self.strategy
    }

    /// Returns the number of hardware temporaries.
    pub fn get_temps(&self) -> u32 {
        self.temps
    }

    /// Returns the number of hardware primary attributes.
    pub fn get_prim_attrs(&self) -> u32 {
        self.prim_attrs
    }

    /// Returns the number of internal registers.
    pub fn get_internals(&self) -> u32 {
        self.internals
    }

    /// Hardware temporaries usable after the split point.
    pub(crate) fn post_split_limit(&self) -> u32 {
        match self.post_split_temps {
            Some(n) => n.min(self.temps),
            None => self.temps,
        }
    }
}
