//! Provides [`Settings`], the aggregate holding everything the device knows about its controller and the
//! synthesizers it drives.
//!
//! `Settings` is never edited field by field once built. It is replaced as a whole (from storage, from the editor or
//! from [`Settings::default`]), which means a CC lookup can never observe a half-updated preset. The only mutation
//! is the choice of active preset.

use crate::preset::Preset;
use alloc::vec::Vec;
use wmidi::{Channel, U7};

/// Preset id reported by [`Settings::current_preset_id`] when there are no presets.
pub const EMPTY_PRESET_ID: u8 = 0xFF;

/// Rows of knobs on a freshly configured controller.
pub const DEFAULT_ROWS: u8 = 2;
/// Columns of knobs on a freshly configured controller.
pub const DEFAULT_COLUMNS: u8 = 4;

/// Physical layout of the MIDI controller and the CCs its knobs send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerLayout {
    /// Number of rows of knobs.
    pub rows: u8,
    /// Number of columns of knobs.
    pub columns: u8,
    /// CC sent by each knob, in row-major order.
    pub input_ccs: Vec<U7>,
}

#[cfg(feature = "defmt")]
impl defmt::Format for ControllerLayout {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "ControllerLayout {{ {}x{}, {} CCs }}",
            self.rows,
            self.columns,
            self.input_ccs.len()
        );
    }
}

impl Default for ControllerLayout {
    /// A 2x4 grid sending CCs 1 to 8.
    fn default() -> Self {
        let knobs = DEFAULT_ROWS * DEFAULT_COLUMNS;
        Self {
            rows: DEFAULT_ROWS,
            columns: DEFAULT_COLUMNS,
            input_ccs: (1..=knobs).map(U7::from_u8_lossy).collect(),
        }
    }
}

/// The device's complete configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    controller: ControllerLayout,
    presets: Vec<Preset>,
    /// `None` if and only if `presets` is empty.
    active: Option<usize>,
}

impl Default for Settings {
    /// Settings written on first boot: the default controller layout and no presets.
    fn default() -> Self {
        Self::new(ControllerLayout::default(), Vec::new())
    }
}

impl Settings {
    /// Constructs [`Settings`] with the first preset (if any) active.
    pub fn new(controller: ControllerLayout, presets: Vec<Preset>) -> Self {
        let active = if presets.is_empty() { None } else { Some(0) };
        Self {
            controller,
            presets,
            active,
        }
    }

    /// Makes the preset at `index` active. Out-of-range indexes are ignored, leaving the current selection.
    pub fn with_active_preset(mut self, index: usize) -> Self {
        if index < self.presets.len() {
            self.active = Some(index);
        } else {
            warn!(
                "Ignoring active preset {} with only {} presets",
                index,
                self.presets.len()
            );
        }
        self
    }

    /// The controller the device is paired with.
    pub fn controller(&self) -> &ControllerLayout {
        &self.controller
    }

    /// Presets in the order the editor arranged them.
    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    /// Number of presets.
    pub fn preset_count(&self) -> usize {
        self.presets.len()
    }

    /// Index of the active preset, or `None` if there are no presets.
    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    /// The active preset, or `None` if there are no presets.
    pub fn active_preset(&self) -> Option<&Preset> {
        self.active.and_then(|index| self.presets.get(index))
    }

    /// Advances to the next preset, wrapping around after the last one. Does nothing if there are no presets.
    pub fn activate_next_preset(&mut self) {
        if let Some(index) = self.active {
            self.active = Some((index + 1) % self.presets.len());
        }
    }

    /// Id of the active preset, or [`EMPTY_PRESET_ID`] if there are no presets.
    pub fn current_preset_id(&self) -> u8 {
        self.active_preset().map_or(EMPTY_PRESET_ID, |p| p.id)
    }

    /// Synthesizer name of the active preset, or an empty string if there are no presets.
    pub fn current_synth_name(&self) -> &str {
        self.active_preset().map_or("", |p| p.synth_name.as_str())
    }

    /// Output channel of the active preset, or channel 1 if there are no presets.
    pub fn current_channel(&self) -> Channel {
        self.active_preset().map_or(Channel::Ch1, Preset::channel)
    }

    /// Rewrites a received CC according to the active preset. Without presets every CC passes through.
    pub fn translate_cc(&self, input: U7) -> U7 {
        self.active_preset()
            .map_or(input, |preset| preset.translate_cc(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn cc(n: u8) -> U7 {
        U7::from_u8_lossy(n)
    }

    fn three_presets() -> Settings {
        Settings::new(
            ControllerLayout::default(),
            vec![
                Preset::new(10, 1, "Moog", "Grandmother", Channel::Ch1).with_mapping(cc(1), cc(19), "cutoff"),
                Preset::new(20, 2, "Korg", "Minilogue", Channel::Ch2).with_mapping(cc(1), cc(43), "cutoff"),
                Preset::new(30, 3, "Arturia", "MiniBrute", Channel::Ch10),
            ],
        )
    }

    #[test]
    fn first_preset_starts_active() {
        let settings = three_presets();
        assert_eq!(Some(0), settings.active_index(), "Expected left but got right");
        assert_eq!(10, settings.current_preset_id(), "Expected left but got right");
    }

    #[test]
    fn activate_next_preset_cycles() {
        let mut settings = three_presets();
        let mut seen = vec![];
        for _ in 0..settings.preset_count() {
            settings.activate_next_preset();
            seen.push(settings.current_preset_id());
        }
        assert_eq!(
            vec![20, 30, 10],
            seen,
            "Should visit every preset and wrap around; expected left but got right"
        );
    }

    #[test]
    fn activate_next_preset_without_presets_is_noop() {
        let mut settings = Settings::default();
        settings.activate_next_preset();
        assert_eq!(None, settings.active_index(), "Expected left but got right");
    }

    #[test]
    fn accessors_without_presets() {
        let mut settings = Settings::default();
        settings.activate_next_preset();
        assert_eq!(EMPTY_PRESET_ID, settings.current_preset_id(), "Expected left but got right");
        assert_eq!("", settings.current_synth_name(), "Expected left but got right");
        assert_eq!(1, settings.current_channel().number(), "Expected left but got right");
        assert_eq!(cc(7), settings.translate_cc(cc(7)), "Expected left but got right");
    }

    #[test]
    fn translation_follows_active_preset() {
        let mut settings = three_presets();
        assert_eq!(cc(19), settings.translate_cc(cc(1)), "Expected left but got right");

        settings.activate_next_preset();
        assert_eq!(cc(43), settings.translate_cc(cc(1)), "Expected left but got right");
        assert_eq!(2, settings.current_channel().number(), "Expected left but got right");

        settings.activate_next_preset();
        assert_eq!(cc(1), settings.translate_cc(cc(1)), "Expected left but got right");
        assert_eq!("MiniBrute", settings.current_synth_name(), "Expected left but got right");
    }

    #[test]
    fn with_active_preset_ignores_out_of_range() {
        let settings = three_presets().with_active_preset(2);
        assert_eq!(Some(2), settings.active_index(), "Expected left but got right");

        let settings = settings.with_active_preset(3);
        assert_eq!(Some(2), settings.active_index(), "Expected left but got right");

        let settings = Settings::default().with_active_preset(0);
        assert_eq!(None, settings.active_index(), "Expected left but got right");
    }

    #[test]
    fn default_layout() {
        let layout = ControllerLayout::default();
        assert_eq!((2, 4), (layout.rows, layout.columns), "Expected left but got right");
        assert_eq!(
            (1..=8).map(cc).collect::<Vec<_>>(),
            layout.input_ccs,
            "Expected left but got right"
        );
    }

    #[test]
    fn controller_is_kept_as_constructed() {
        let layout = ControllerLayout {
            rows: 1,
            columns: 2,
            input_ccs: vec![cc(30), cc(31)],
        };
        let mut settings = Settings::new(layout.clone(), vec![]);
        settings.activate_next_preset();
        assert_eq!(&layout, settings.controller(), "Expected left but got right");
    }
}
