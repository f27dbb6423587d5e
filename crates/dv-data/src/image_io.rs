//! Raster images decoded with the `image` crate

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dv_core::adapter::{Adapter, FetchContext, IconGlyph, Sliceable};
use dv_core::array::{ArrayValue, IndexElem};
use dv_core::rti::RepoTreeItem;
use dv_core::{RtiError, Value};
use image::{DynamicImage, ImageReader};
use ndarray::{ArrayD, IxDyn};
use tracing::debug;

use crate::DataError;

pub const ICON_COLOR: &str = "#880088";

/// Pixels as a `Y × X` or `Y × X × Band` array plus the band letters
pub struct DecodedImage {
    pub array: ArrayValue,
    pub mode: &'static str,
    pub format: String,
    pub width: u32,
    pub height: u32,
}

fn pixels<T>(raw: Vec<T>, height: u32, width: u32, bands: usize) -> Result<ArrayD<T>, DataError> {
    let shape = if bands == 1 {
        vec![height as usize, width as usize]
    } else {
        vec![height as usize, width as usize, bands]
    };
    Ok(ArrayD::from_shape_vec(IxDyn(&shape), raw)?)
}

/// Decode an image file, guessing the format from its content
pub fn read_image(path: &Path) -> Result<DecodedImage, DataError> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader
        .format()
        .map(|format| format!("{format:?}").to_uppercase())
        .unwrap_or_default();
    let image = reader.decode()?;
    let (width, height) = (image.width(), image.height());

    let (array, mode) = match image {
        DynamicImage::ImageLuma8(buffer) => (ArrayValue::from(pixels(buffer.into_raw(), height, width, 1)?), "L"),
        DynamicImage::ImageLumaA8(buffer) => (ArrayValue::from(pixels(buffer.into_raw(), height, width, 2)?), "LA"),
        DynamicImage::ImageRgb8(buffer) => (ArrayValue::from(pixels(buffer.into_raw(), height, width, 3)?), "RGB"),
        DynamicImage::ImageRgba8(buffer) => (ArrayValue::from(pixels(buffer.into_raw(), height, width, 4)?), "RGBA"),
        DynamicImage::ImageLuma16(buffer) => (ArrayValue::from(pixels(buffer.into_raw(), height, width, 1)?), "I;16"),
        DynamicImage::ImageLumaA16(buffer) => (ArrayValue::from(pixels(buffer.into_raw(), height, width, 2)?), "LA"),
        DynamicImage::ImageRgb16(buffer) => (ArrayValue::from(pixels(buffer.into_raw(), height, width, 3)?), "RGB"),
        DynamicImage::ImageRgba16(buffer) => (ArrayValue::from(pixels(buffer.into_raw(), height, width, 4)?), "RGBA"),
        DynamicImage::ImageRgb32F(buffer) => (ArrayValue::from(pixels(buffer.into_raw(), height, width, 3)?), "RGB"),
        DynamicImage::ImageRgba32F(buffer) => (ArrayValue::from(pixels(buffer.into_raw(), height, width, 4)?), "RGBA"),
        other => (ArrayValue::from(pixels(other.into_rgba8().into_raw(), height, width, 4)?), "RGBA"),
    };
    debug!("Decoded {} image {}x{} in mode {}", format, width, height, mode);

    Ok(DecodedImage {
        array,
        mode,
        format,
        width,
        height,
    })
}

/// Letters naming the bands of a mode, e.g. `R`, `G`, `B`
pub fn band_names(mode: &str) -> Vec<String> {
    match mode {
        "I;16" => vec!["L".to_string()],
        other => other.chars().map(String::from).collect(),
    }
}

/// An image file; multi-band images have one child per band
pub struct ImageFileAdapter {
    path: PathBuf,
    image: Option<DecodedImage>,
}

impl ImageFileAdapter {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            image: None,
        }
    }
}

impl Adapter for ImageFileAdapter {
    fn type_name(&self) -> &str {
        "Image"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Array
    }

    fn has_children(&self) -> bool {
        self.image.as_ref().map_or(true, |image| image.array.ndim() == 3)
    }

    fn open_resources(&mut self) -> Result<(), RtiError> {
        self.image = Some(read_image(&self.path)?);
        Ok(())
    }

    fn close_resources(&mut self) -> Result<(), RtiError> {
        self.image = None;
        Ok(())
    }

    fn holds_resource(&self) -> bool {
        self.image.is_some()
    }

    fn fetch_all_children(&self, ctx: &FetchContext<'_>) -> Result<Vec<RepoTreeItem>, RtiError> {
        let image = self.image.as_ref().ok_or_else(|| RtiError::NotOpen(ctx.node_name.to_string()))?;
        if image.array.ndim() != 3 {
            return Ok(Vec::new());
        }
        band_names(image.mode)
            .into_iter()
            .enumerate()
            .map(|(n, name)| {
                let band = image.array.get_item(&[IndexElem::Ellipsis, IndexElem::at(n as isize)])?;
                Ok(RepoTreeItem::new(name, BandAdapter { band }).with_icon_color(ctx.icon_color))
            })
            .collect()
    }

    fn attributes(&self) -> BTreeMap<String, Value> {
        let mut attributes = BTreeMap::new();
        if let Some(image) = &self.image {
            attributes.insert("Format".to_string(), Value::from(image.format.as_str()));
            attributes.insert("Mode".to_string(), Value::from(image.mode));
            attributes.insert("Size".to_string(), Value::from(format!("({}, {})", image.width, image.height)));
            attributes.insert("Width".to_string(), Value::UInt(u64::from(image.width)));
            attributes.insert("Height".to_string(), Value::UInt(u64::from(image.height)));
        }
        attributes
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        self.image.as_ref().map(|image| image as &dyn Sliceable)
    }
}

impl Sliceable for DecodedImage {
    fn shape(&self) -> Vec<usize> {
        self.array.shape().to_vec()
    }

    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        Ok(self.array.get_item(index)?)
    }

    fn element_type_name(&self) -> String {
        self.array.element_type_name().to_string()
    }

    fn dimension_names(&self) -> Vec<String> {
        let mut names = vec!["Y".to_string(), "X".to_string()];
        if self.array.ndim() == 3 {
            names.push("Band".to_string());
        }
        names
    }
}

/// One band of a multi-band image
pub struct BandAdapter {
    band: ArrayValue,
}

impl Adapter for BandAdapter {
    fn type_name(&self) -> &str {
        "Image band"
    }

    fn icon_glyph(&self) -> IconGlyph {
        IconGlyph::Array
    }

    fn has_children(&self) -> bool {
        false
    }

    fn sliceable(&self) -> Option<&dyn Sliceable> {
        Some(self)
    }
}

impl Sliceable for BandAdapter {
    fn shape(&self) -> Vec<usize> {
        self.band.shape().to_vec()
    }

    fn get_item(&self, index: &[IndexElem]) -> Result<ArrayValue, RtiError> {
        Ok(self.band.get_item(index)?)
    }

    fn element_type_name(&self) -> String {
        self.band.element_type_name().to_string()
    }

    fn dimension_names(&self) -> Vec<String> {
        vec!["Y".to_string(), "X".to_string()]
    }
}

pub fn create_image_file(path: &Path) -> RepoTreeItem {
    RepoTreeItem::for_file(path, ImageFileAdapter::new(path)).with_icon_color(ICON_COLOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_core::testkit::check_adapter_contract;
    use dv_core::{parse_index, ErrorPolicy, Registry};
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn write_rgb(path: &Path) {
        let mut image = RgbImage::new(4, 3);
        image.put_pixel(1, 2, Rgb([10, 20, 30]));
        image.save(path).unwrap();
    }

    #[test]
    fn test_rgb_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("photo.png");
        write_rgb(&path);

        let mut item = create_image_file(&path);
        item.open(ErrorPolicy::Strict).unwrap();
        assert_eq!(item.shape().unwrap(), vec![3, 4, 3]);
        assert_eq!(item.dimension_names(), vec!["Y", "X", "Band"]);
        let attributes = item.attributes();
        assert_eq!(attributes.get("Format"), Some(&Value::from("PNG")));
        assert_eq!(attributes.get("Mode"), Some(&Value::from("RGB")));
        assert_eq!(attributes.get("Size"), Some(&Value::from("(4, 3)")));

        let pixel = item.get_item(&parse_index("2, 1").unwrap()).unwrap();
        let expected: ArrayValue = ndarray::arr1(&[10u8, 20, 30]).into_dyn().into();
        assert_eq!(pixel, expected);

        item.close(ErrorPolicy::Strict).unwrap();
        let children = item.fetch_children(&Registry::new(), ErrorPolicy::Strict).unwrap();
        let names: Vec<&str> = children.iter().map(|c| c.node_name()).collect();
        assert_eq!(names, vec!["R", "G", "B"]);
        assert_eq!(children[2].shape().unwrap(), vec![3, 4]);
        let blue = children[2].get_item(&parse_index("2, 1").unwrap()).unwrap();
        assert_eq!(blue.scalar_value(), Some(Value::UInt(30)));
    }

    #[test]
    fn test_gray_image_has_no_bands() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mask.png");
        GrayImage::from_pixel(2, 2, Luma([7])).save(&path).unwrap();

        let mut item = create_image_file(&path);
        let children = item.fetch_children(&Registry::new(), ErrorPolicy::Strict).unwrap();
        assert!(children.is_empty());
        assert!(!item.has_children());
        assert_eq!(item.dimension_names(), vec!["Y", "X"]);
        assert_eq!(item.attributes().get("Mode"), Some(&Value::from("L")));
    }

    #[test]
    fn test_contract() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("photo.png");
        write_rgb(&path);
        check_adapter_contract(&|| create_image_file(&path), Arc::new(Registry::new()));

        let bad = dir.path().join("broken.png");
        std::fs::write(&bad, b"not a png").unwrap();
        check_adapter_contract(&|| create_image_file(&bad), Arc::new(Registry::new()));
    }
}
