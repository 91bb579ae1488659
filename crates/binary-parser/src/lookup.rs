//! Process-wide symbol lookup across loaded images

use machscope_core::config::{DiagnosticsConfig, LookupConfig};
use machscope_core::Config;
use tracing::debug;

use crate::diagnostics::Diagnostics;
use crate::exports::ExportRecord;
use crate::format::MH_DYLINKER;
use crate::image::MachImage;

/// An image together with the path it was loaded from
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage<'a> {
    pub path: &'a str,
    pub image: MachImage<'a>,
}

/// Source of loaded images, in load order
pub trait ImageEnumerator<'a> {
    fn image_count(&self) -> usize;

    fn image(&self, index: usize) -> Option<LoadedImage<'a>>;
}

#[derive(Debug, Clone, Default)]
pub struct ImageList<'a> {
    images: Vec<LoadedImage<'a>>,
}

impl<'a> ImageList<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: &'a str, image: MachImage<'a>) {
        self.images.push(LoadedImage { path, image });
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LoadedImage<'a>> {
        self.images.iter()
    }
}

impl<'a> FromIterator<LoadedImage<'a>> for ImageList<'a> {
    fn from_iter<I: IntoIterator<Item = LoadedImage<'a>>>(iter: I) -> Self {
        Self {
            images: iter.into_iter().collect(),
        }
    }
}

impl<'a> ImageEnumerator<'a> for ImageList<'a> {
    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn image(&self, index: usize) -> Option<LoadedImage<'a>> {
        self.images.get(index).copied()
    }
}

/// Name lookup over every image an enumerator reports
pub struct GlobalSymbolLookup<E> {
    images: E,
    lookup: LookupConfig,
    diagnostics: DiagnosticsConfig,
}

impl<'a, E: ImageEnumerator<'a>> GlobalSymbolLookup<E> {
    pub fn new(images: E) -> Self {
        Self {
            images,
            lookup: LookupConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }

    pub fn with_config(images: E, config: &Config) -> Self {
        Self {
            images,
            lookup: config.lookup.clone(),
            diagnostics: config.diagnostics.clone(),
        }
    }

    pub fn images(&self) -> &E {
        &self.images
    }

    fn decorate(&self, name: &str) -> String {
        format!("{}{}", self.lookup.symbol_prefix, name)
    }

    /// A simulator's own dynamic linker is loaded as an ordinary image and
    /// must not satisfy lookups
    fn is_simulator_shim(&self, loaded: &LoadedImage<'a>) -> bool {
        loaded.image.file_type() == MH_DYLINKER
            && self
                .lookup
                .simulator_shims
                .iter()
                .any(|shim| loaded.path.contains(shim.as_str()))
    }

    fn loaded_images(&self) -> impl Iterator<Item = LoadedImage<'a>> + '_ {
        (0..self.images.image_count()).filter_map(move |index| self.images.image(index))
    }

    /// Loaded image matching a dependent's load path
    fn find_dependent(&self, load_path: &str) -> Option<MachImage<'a>> {
        self.loaded_images()
            .find(|loaded| {
                loaded.path == load_path || loaded.image.install_name() == Some(load_path)
            })
            .map(|loaded| loaded.image)
    }

    fn resolve_in(&self, loaded: &LoadedImage<'a>, symbol: &str) -> Option<ExportRecord<'a>> {
        let mut diag = Diagnostics::from_config(&self.diagnostics);
        let mut resolver = |_: u32, load_path: &str| self.find_dependent(load_path);
        match loaded
            .image
            .find_exported_symbol(&mut diag, symbol, Some(&mut resolver))
        {
            Ok(record) => record,
            Err(error) => {
                debug!(image = loaded.path, %error, "export lookup failed");
                None
            }
        }
    }

    /// Address of `name` (undecorated). A strong definition wins over any
    /// weak one; without a strong definition the first weak one is used.
    /// Returns 0 when nothing defines the symbol.
    pub fn lookup(&self, name: &str) -> u64 {
        let symbol = self.decorate(name);
        let mut weak_hit = None;
        for loaded in self.loaded_images() {
            if self.is_simulator_shim(&loaded) {
                continue;
            }
            let Some(record) = self.resolve_in(&loaded, &symbol) else {
                continue;
            };
            let Some(address) = record.address() else {
                continue;
            };
            if !record.is_weak_def {
                debug!(symbol = %symbol, image = loaded.path, address, "strong definition");
                return address;
            }
            if weak_hit.is_none() {
                weak_hit = Some(address);
            }
        }
        weak_hit.unwrap_or(0)
    }

    /// Address of `name` in the first image that exports it, weak or not
    pub fn find_first(&self, name: &str) -> u64 {
        let symbol = self.decorate(name);
        self.loaded_images()
            .find_map(|loaded| self.resolve_in(&loaded, &symbol)?.address())
            .unwrap_or(0)
    }
}
