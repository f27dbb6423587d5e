//! WAV audio read with `hound`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dv_core::adapter::{Adapter, FetchContext, IconGlyph, Sliceable};
use dv_core::array::{ArrayValue, IndexElem};
use dv_core::rti::RepoTreeItem;
use dv_core::{RtiError, Value};
use hound::{SampleFormat, WavReader, WavSpec};
use ndarray::{ArrayD, IxDyn};

use crate::DataError;

pub const ICON_COLOR: &str = "#880088";

/// Samples shaped `[frames]` for mono and `[frames, channels]` otherwise
pub struct Waveform {
    pub spec: WavSpec,
    pub samples: ArrayValue,
}

fn frames<T>(samples: Vec<T>, channels: usize) -> Result<ArrayD<T>, DataError> {
    let frames = samples.len() / channels.max(1);
    let shape = if channels == 1 { vec![frames] } else { vec![frames, channels] };
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), samples)?)
}

pub fn read_wav(path: &Path) -> Result<Waveform, DataError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels);

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => {
            let samples = reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?;
            ArrayValue::from(frames(samples, channels)?)
        }
        (SampleFormat::Int, bits) if bits <= 8 => {
            let samples = reader.samples::<i8>().collect::<Result<Vec<_>, _>>()?;
            ArrayValue::from(frames(samples, channels)?)
        }
        (SampleFormat::Int, bits) if bits <= 16 => {
            let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
            ArrayValue::from(frames(samples, channels)?)
        }
        (SampleFormat::Int, _) => {
            let samples = reader.samples::<i32>().collect::<Result<Vec<_>, _>>()?;
            ArrayValue::from(frames(samples, channels)?)
        }
    };
    Ok(Waveform { spec, samples })
}

/// A WAV file; multi-channel files have one child per channel
pub struct WavFileAdapter {
    path: PathBuf,
    wave: Option<Waveform>,
}

impl WavFileAdapter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            wave: None,
        }
    }
}

impl Adapter for WavFileAdapter {
    fn type_name(&self) -> &str {
        "WAV file"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Array
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        self.wave = Some(read_wav(&self.path)?);
        Ok(())
    }

    fn close_resources(&mut self) -> Result<(), RtiError> {
        self.wave = None;
        Ok(())
    }

    fn holds_resource(&self) -> bool {
        self.wave.is_some()
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let wave = self.wave.as_ref().ok_or_else(|| RtiError::NotOpen(ctx.node_name.to_string()))?;
        if wave.samples.ndim() != 2 {
            return Ok(Vec::new());
        }
        (0..wave.samples.shape()[1])
            .map(|n| {
                let channel = wave.samples.get_item(&[IndexElem::full(), IndexElem::at(n as isize)])?;
                Ok(RepoTreeItem::new(format!("channel-{n}"), ChannelAdapter { channel }).with_icon_color(ctx.icon_color))
            })
            .collect()
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        let mut attributes = BTreeMap::new();
        if let Some(wave) = &self.wave {
            attributes.insert("rate".to_string(), Value::UInt(u64::from(wave.spec.sample_rate)));
            attributes.insert("channels".to_string(), Value::UInt(u64::from(wave.spec.channels)));
            attributes.insert("bits_per_sample".to_string(), Value::UInt(u64::from(wave.spec.bits_per_sample)));
        }
        attributes
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        self.wave.as_ref().map(|wave| wave as &dyn Sliceable)
    }
}

impl Sliceable for Waveform {
    fn shape(&self) -> Vec<usize> {
        self.samples.shape().to_vec()
    }

    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        Ok(self.samples.get_item(index)?)
    }

    fn element_type_name(&self) -> String {
        self.samples.element_type_name().to_string()
    }

    fn dimension_names(&self) -> Vec<String> {
        let mut names = vec!["frame".to_string()];
        if self.samples.ndim() == 2 {
            names.push("channel".to_string());
        }
        names
    }
}

/// One channel of a multi-channel recording
pub struct ChannelAdapter {
    channel: ArrayValue,
}

impl Adapter for ChannelAdapter {
    fn type_name(&self) -> &str {
        "WAV channel"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Array
    }

    fn has_children(&self) -> bool {
        false
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        Some(&self.channel)
    }
}

pub fn create_wav_file(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, WavFileAdapter::new(path)).with_icon_color(ICON_COLOR)
}
