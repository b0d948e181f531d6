//! HLS playlist reading
//!
//! One reader per live caption worker. Tracks which segment URIs were
//! already handed out so each segment is processed at most once, and
//! resolves a master playlist to its first media variant exactly once
//! (sticky until `reset`).

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use m3u8_rs::Playlist;
use tracing::info;
use url::Url;

pub struct PlaylistReader {
    client: reqwest::Client,
    seen: HashSet<String>,
    media_url: Option<Url>,
}

impl PlaylistReader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            seen: HashSet::new(),
            media_url: None,
        })
    }

    /// Fetches the playlist and returns the segment URIs not seen before,
    /// in playlist order. The returned URIs are marked seen.
    ///
    /// On the first call a master playlist is resolved to its first
    /// variant; subsequent calls go straight to the media playlist.
    pub async fn fetch_new_segments(&mut self, playlist_url: &str) -> Result<Vec<String>> {
        let url = match &self.media_url {
            Some(resolved) => resolved.clone(),
            None => Url::parse(playlist_url).context("invalid playlist URL")?,
        };

        let body = self.fetch_text(&url).await?;

        match m3u8_rs::parse_playlist_res(body.as_bytes()) {
            Ok(Playlist::MediaPlaylist(media)) => Ok(self.collect_new(&media, &url)),
            Ok(Playlist::MasterPlaylist(master)) => {
                let variant = master
                    .variants
                    .first()
                    .ok_or_else(|| anyhow!("master playlist has no variants"))?;
                let media_url = url
                    .join(&variant.uri)
                    .context("invalid variant URI in master playlist")?;
                info!("Master playlist detected, using media: {}", media_url);
                self.media_url = Some(media_url.clone());

                let body = self.fetch_text(&media_url).await?;
                match m3u8_rs::parse_playlist_res(body.as_bytes()) {
                    Ok(Playlist::MediaPlaylist(media)) => Ok(self.collect_new(&media, &media_url)),
                    Ok(Playlist::MasterPlaylist(_)) => {
                        Err(anyhow!("variant resolved to another master playlist"))
                    }
                    Err(e) => Err(anyhow!("media playlist parse failed: {}", e)),
                }
            }
            Err(e) => Err(anyhow!("playlist parse failed: {}", e)),
        }
    }

    async fn fetch_text(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("playlist fetch failed: {}", url))?
            .error_for_status()
            .with_context(|| format!("playlist fetch failed: {}", url))?;
        Ok(response.text().await?)
    }

    fn collect_new(&mut self, media: &m3u8_rs::MediaPlaylist, base: &Url) -> Vec<String> {
        let mut fresh = Vec::new();
        for segment in &media.segments {
            let Ok(absolute) = base.join(&segment.uri) else {
                continue;
            };
            let absolute = absolute.to_string();
            if self.seen.insert(absolute.clone()) {
                fresh.push(absolute);
            }
        }
        fresh
    }

    /// Clears the seen-set and the resolved media-playlist URL.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.media_url = None;
    }

    #[cfg(test)]
    fn collect_new_from_text(&mut self, playlist_text: &str, base: &str) -> Vec<String> {
        let base = Url::parse(base).unwrap();
        match m3u8_rs::parse_playlist_res(playlist_text.as_bytes()) {
            Ok(Playlist::MediaPlaylist(media)) => self.collect_new(&media, &base),
            _ => panic!("expected a media playlist"),
        }
    }
}
