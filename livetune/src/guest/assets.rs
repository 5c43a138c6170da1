//! Remix asset mapping.
//!
//! Game code resolves every asset id through [`AssetsModule::asset_url`],
//! which always answers: the remix replacement when one is mapped, the id
//! itself otherwise. Image-like mappings are preloaded on a worker thread
//! and land in the cache the next time the guest polls.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use indexmap::IndexMap;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::control::{Observers, Subscription};
use crate::framework::util::{HashMap, now_ms};
use crate::protocol::{AssetManifest, GuestMessage};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Audio,
    Video,
    Sprite,
}

impl AssetKind {
    /// Guesses from the file extension; anything unrecognised is a sprite
    pub fn detect(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let extension = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "svg" => AssetKind::Image,
            "mp3" | "wav" | "ogg" | "aac" => AssetKind::Audio,
            "mp4" | "webm" | "ogv" => AssetKind::Video,
            _ => AssetKind::Sprite,
        }
    }

    /// Sprites are sheets of pixels too and get preloaded with images
    pub fn is_image(&self) -> bool {
        matches!(self, AssetKind::Image | AssetKind::Sprite)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetMapping {
    #[serde(alias = "originalUrl")]
    pub original_id: String,
    #[serde(alias = "remixUrl")]
    pub remix_id: String,
    #[serde(alias = "type")]
    pub kind: AssetKind,
}

impl AssetMapping {
    pub fn new(original_id: &str, remix_id: &str) -> Self {
        Self {
            original_id: original_id.to_string(),
            remix_id: remix_id.to_string(),
            kind: AssetKind::detect(remix_id),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoadedImage {
    pub url: String,
    /// Known for PNGs; other formats are handed over undecoded
    pub dimensions: Option<(u32, u32)>,
    pub bytes: Vec<u8>,
}

impl LoadedImage {
    pub fn decode(url: &str, bytes: Vec<u8>) -> Result<Self, String> {
        if bytes.is_empty() {
            return Err(format!("image '{}' is empty", url));
        }

        let dimensions = if bytes.starts_with(&PNG_SIGNATURE) {
            let decoder = png::Decoder::new(Cursor::new(bytes.as_slice()));
            let reader = decoder.read_info().map_err(|err| {
                format!("failed to decode PNG '{}': {}", url, err)
            })?;
            let info = reader.info();
            Some((info.width, info.height))
        } else {
            None
        };

        Ok(Self {
            url: url.to_string(),
            dimensions,
            bytes,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssetLoadEvent {
    pub url: String,
    pub success: bool,
}

/// Where asset bytes come from
pub trait AssetLoader: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, String>;
}

/// Reads `file://` URLs and plain paths, relative ones against `root`
#[derive(Clone, Debug, Default)]
pub struct FileLoader {
    root: PathBuf,
}

impl FileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, url: &str) -> Result<PathBuf, String> {
        if url.contains("://") && !url.starts_with("file://") {
            return Err(format!("cannot fetch remote asset '{}'", url));
        }

        let path = Path::new(url.trim_start_matches("file://"));
        Ok(if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        })
    }
}

impl AssetLoader for FileLoader {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, String> {
        let path = self.resolve(url)?;
        std::fs::read(&path).map_err(|err| {
            format!("failed to read asset '{}': {}", path.display(), err)
        })
    }
}

type Preloaded = (u64, String, Result<LoadedImage, String>);

pub struct AssetsModule {
    mappings: IndexMap<String, AssetMapping>,
    loaded: HashMap<String, Arc<LoadedImage>>,
    loader: Arc<dyn AssetLoader>,
    observers: Observers<AssetLoadEvent>,
    preload_tx: Sender<Preloaded>,
    preload_rx: Receiver<Preloaded>,
    generation: u64,
}

impl AssetsModule {
    pub fn new(loader: Arc<dyn AssetLoader>) -> Self {
        let (preload_tx, preload_rx) = mpsc::channel();

        Self {
            mappings: IndexMap::new(),
            loaded: HashMap::default(),
            loader,
            observers: Observers::new("asset load"),
            preload_tx,
            preload_rx,
            generation: 0,
        }
    }

    /// Merges `mappings` (last write wins per original id), starts preloading
    /// the image-like ones and returns the manifest to announce.
    pub fn map_assets(&mut self, mappings: Vec<AssetMapping>) -> GuestMessage {
        let mut to_preload = vec![];

        for mapping in mappings {
            debug!("mapped {} -> {}", mapping.original_id, mapping.remix_id);
            if mapping.kind.is_image()
                && !self.loaded.contains_key(&mapping.remix_id)
                && !to_preload.contains(&mapping.remix_id)
            {
                to_preload.push(mapping.remix_id.clone());
            }
            self.mappings.insert(mapping.original_id.clone(), mapping);
        }

        self.preload(to_preload);
        self.manifest()
    }

    pub fn asset_url<'a>(&'a self, original_id: &'a str) -> &'a str {
        self.mappings
            .get(original_id)
            .map_or(original_id, |mapping| mapping.remix_id.as_str())
    }

    pub fn mappings(&self) -> Vec<AssetMapping> {
        self.mappings.values().cloned().collect()
    }

    pub fn manifest(&self) -> GuestMessage {
        GuestMessage::AssetsManifest(AssetManifest {
            assets: self.mappings(),
            timestamp: now_ms(),
        })
    }

    /// Drops every mapping and cached image. Preloads still running are
    /// discarded when they arrive.
    pub fn clear_mappings(&mut self) {
        self.mappings.clear();
        self.loaded.clear();
        self.generation += 1;
        info!("asset mappings cleared");
    }

    pub fn is_loaded(&self, original_id: &str) -> bool {
        self.loaded.contains_key(self.asset_url(original_id))
    }

    pub fn load_image(
        &mut self,
        original_id: &str,
    ) -> Result<Arc<LoadedImage>, String> {
        let url = self.asset_url(original_id).to_string();

        if let Some(image) = self.loaded.get(&url) {
            return Ok(image.clone());
        }

        let result = fetch_image(self.loader.as_ref(), &url);
        self.store(url, result)
    }

    /// Loads a batch in parallel. Each entry succeeds or fails on its own;
    /// one bad asset never aborts its siblings.
    pub fn load_images(
        &mut self,
        original_ids: &[&str],
    ) -> Vec<Result<Arc<LoadedImage>, String>> {
        let urls: Vec<String> = original_ids
            .iter()
            .map(|id| self.asset_url(id).to_string())
            .collect();

        let mut pending: Vec<&str> = vec![];
        for url in &urls {
            if !self.loaded.contains_key(url) && !pending.contains(&url.as_str())
            {
                pending.push(url);
            }
        }

        let loader = self.loader.clone();
        let fetched: Vec<(String, Result<LoadedImage, String>)> = pending
            .par_iter()
            .map(|url| (url.to_string(), fetch_image(loader.as_ref(), url)))
            .collect();

        let mut failures: HashMap<String, String> = HashMap::default();
        for (url, result) in fetched {
            if let Err(err) = self.store(url.clone(), result) {
                failures.insert(url, err);
            }
        }

        urls.iter()
            .map(|url| match self.loaded.get(url) {
                Some(image) => Ok(image.clone()),
                None => Err(failures
                    .get(url)
                    .cloned()
                    .unwrap_or_else(|| format!("image '{}' not loaded", url))),
            })
            .collect()
    }

    /// Moves finished background preloads into the cache; returns how many
    /// arrived.
    pub fn drain_preloaded(&mut self) -> usize {
        let mut count = 0;

        while let Ok((generation, url, result)) = self.preload_rx.try_recv() {
            if generation != self.generation {
                debug!("discarding stale preload of {}", url);
                continue;
            }
            let _ = self.store(url, result);
            count += 1;
        }

        count
    }

    pub fn on_asset_load<F>(&mut self, callback: F) -> Subscription
    where
        F: FnMut(&AssetLoadEvent) + Send + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn off(&mut self, subscription: Subscription) -> bool {
        self.observers.unsubscribe(subscription)
    }

    pub fn take_faults(&mut self) -> Vec<String> {
        self.observers.take_faults()
    }

    fn preload(&self, urls: Vec<String>) {
        if urls.is_empty() {
            return;
        }

        debug!("preloading {} images", urls.len());
        let loader = self.loader.clone();
        let tx = self.preload_tx.clone();
        let generation = self.generation;

        thread::spawn(move || {
            urls.par_iter().for_each_with(tx, |tx, url| {
                let result = fetch_image(loader.as_ref(), url);
                let _ = tx.send((generation, url.clone(), result));
            });
        });
    }

    fn store(
        &mut self,
        url: String,
        result: Result<LoadedImage, String>,
    ) -> Result<Arc<LoadedImage>, String> {
        match result {
            Ok(image) => {
                let image = Arc::new(image);
                self.loaded.insert(url.clone(), image.clone());
                debug!("image loaded: {}", url);
                self.observers.notify(&AssetLoadEvent { url, success: true });
                Ok(image)
            }
            Err(err) => {
                warn!("{}", err);
                self.observers.notify(&AssetLoadEvent {
                    url,
                    success: false,
                });
                Err(err)
            }
        }
    }
}

fn fetch_image(
    loader: &dyn AssetLoader,
    url: &str,
) -> Result<LoadedImage, String> {
    let bytes = loader.fetch(url)?;
    LoadedImage::decode(url, bytes)
}
