//! Provides [`Preset`], a group of CC rewrites aimed at one synthesizer, along with the [`Mapping`]s it is built
//! from.
//!
//! Alongside its list of mappings, a preset keeps a 128-entry translation table so that rewriting a CC in the hot
//! MIDI path is a single index operation. The table is derived state: it is only ever written by
//! [`Preset::set_mapping`], which keeps it consistent with the list.

use alloc::string::String;
use alloc::vec::Vec;
use wmidi::{Channel, U7};

/// The number of distinct controller numbers in MIDI 1.0.
pub const CC_COUNT: usize = 128;

/// A single CC substitution rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    /// Controller number as received from the controller.
    pub input: U7,
    /// Controller number sent to the synthesizer in place of `input`.
    pub output: U7,
    /// Name of the synthesizer parameter behind `output`, e.g. "cutoff".
    pub name: String,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Mapping {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "{} => {} ({})",
            u8::from(self.input),
            u8::from(self.output),
            self.name.as_str()
        );
    }
}

/// Lookup from input CC to output CC.
///
/// Each entry records whether it was explicitly set, so a mapping onto CC 0 is not mistaken for "unmapped".
#[derive(Clone, Debug, PartialEq, Eq)]
struct TranslationTable([Option<U7>; CC_COUNT]);

impl TranslationTable {
    const fn new() -> Self {
        Self([None; CC_COUNT])
    }

    fn set(&mut self, input: U7, output: U7) {
        self.0[usize::from(u8::from(input))] = Some(output);
    }

    fn get(&self, input: U7) -> Option<U7> {
        self.0[usize::from(u8::from(input))]
    }
}

/// A configuration profile targeting one synthesizer: its identity, the channel it listens on and the CC rewrites
/// it needs.
#[derive(Clone, Debug, PartialEq)]
pub struct Preset {
    /// Identifier chosen by the editor. Not necessarily unique.
    pub id: u8,
    /// Identifier of the synthesizer model in the editor's synth catalogue.
    pub synth_id: u8,
    /// Synthesizer manufacturer, e.g. "Moog".
    pub manufacturer: String,
    /// Synthesizer name, shown on the display while the preset is active.
    pub synth_name: String,
    channel: Channel,
    mappings: Vec<Mapping>,
    table: TranslationTable,
}

#[cfg(feature = "defmt")]
impl defmt::Format for Preset {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "Preset {{ id: {}, synth: {} ({}), channel: {}, mappings: {} }}",
            self.id,
            self.synth_name.as_str(),
            self.synth_id,
            self.channel.number(),
            self.mappings.as_slice()
        );
    }
}

impl Preset {
    /// Constructs a [`Preset`] without any mappings; every CC passes through unchanged until
    /// [`set_mapping`](Self::set_mapping) is called.
    pub fn new(
        id: u8,
        synth_id: u8,
        manufacturer: impl Into<String>,
        synth_name: impl Into<String>,
        channel: Channel,
    ) -> Self {
        Self {
            id,
            synth_id,
            manufacturer: manufacturer.into(),
            synth_name: synth_name.into(),
            channel,
            mappings: Vec::new(),
            table: TranslationTable::new(),
        }
    }

    /// Builder-style [`set_mapping`](Self::set_mapping).
    pub fn with_mapping(mut self, input: U7, output: U7, name: impl Into<String>) -> Self {
        self.set_mapping(input, output, name);
        self
    }

    /// Rewrites `input` to `output` whenever this preset is active.
    ///
    /// A preset holds at most one mapping per input CC: setting an input that is already mapped replaces the
    /// existing mapping in place, keeping its position in [`mappings`](Self::mappings).
    pub fn set_mapping(&mut self, input: U7, output: U7, name: impl Into<String>) {
        let name = name.into();
        match self.mappings.iter_mut().find(|m| m.input == input) {
            Some(existing) => {
                existing.output = output;
                existing.name = name;
            }
            None => self.mappings.push(Mapping {
                input,
                output,
                name,
            }),
        }
        self.table.set(input, output);
    }

    /// Returns the CC to send for a received `input`: the mapped output if one was set, otherwise `input` itself.
    pub fn translate_cc(&self, input: U7) -> U7 {
        self.table.get(input).unwrap_or(input)
    }

    /// MIDI channel on which the target synthesizer listens.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Mappings in the order they were added.
    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }
}
