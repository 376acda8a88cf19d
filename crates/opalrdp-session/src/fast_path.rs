//! FastPath output processing: decryption, decompression, fragment
//! reassembly, and dispatch of the decoded update into the framebuffer and
//! the display caches.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use opalrdp_bulk::Decompressor;
use opalrdp_connector::encode_share_data;
use opalrdp_core::{decode_cursor, ReadCursor, WriteBuf};
use opalrdp_graphics::bitmap_cache::BitmapCacheManager;
use opalrdp_graphics::offscreen_cache::OffscreenCache;
use opalrdp_graphics::rle;
use opalrdp_pdu::bitmap::Compression as BitmapCompression;
use opalrdp_pdu::fast_path::{
    EncryptionFlags, FastPathHeader, FastPathUpdate, FastPathUpdatePdu, Fragmentation, PointerUpdateData, UpdateCode,
};
use opalrdp_pdu::geometry::{ExclusiveRectangle, InclusiveRectangle};
use opalrdp_pdu::rdp::bitmap_cache::BitmapCacheErrorPdu;
use opalrdp_pdu::rdp::finalization_messages::FrameAcknowledgePdu;
use opalrdp_pdu::rdp::headers::ShareDataPdu;
use opalrdp_pdu::surface_commands::{FrameAction, SurfaceCommand};

use crate::crypto::SessionCrypto;
use crate::image::{BitmapSink as _, DecodedImage};
use crate::{SessionError, SessionErrorExt as _, SessionErrorKind, SessionResult};

/// Reassembly buffers are bounded; outgrowing this is a protocol violation.
const MAX_FRAGMENTED_UPDATE_SIZE: usize = 4 * 1024 * 1024;

/// What a processed FastPath frame produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    Region(InclusiveRectangle),
    PointerDefault,
    PointerHidden,
    PointerPosition { x: u16, y: u16 },
}

pub struct Processor {
    complete_data: CompleteData,
    bitmap_caches: RwLock<BitmapCacheManager>,
    offscreen_cache: OffscreenCache,
    user_channel_id: u16,
    io_channel_id: u16,
    share_id: u32,
    rle_buffer: Vec<u8>,
}

pub struct ProcessorBuilder {
    pub io_channel_id: u16,
    pub user_channel_id: u16,
    pub share_id: u32,
}

impl ProcessorBuilder {
    pub fn build(self) -> Processor {
        Processor {
            complete_data: CompleteData::new(),
            bitmap_caches: RwLock::new(BitmapCacheManager::new()),
            offscreen_cache: OffscreenCache::new(),
            user_channel_id: self.user_channel_id,
            io_channel_id: self.io_channel_id,
            share_id: self.share_id,
            rle_buffer: Vec::new(),
        }
    }
}

impl Processor {
    /// Processes one FastPath output frame.
    ///
    /// Any response PDUs (frame acknowledges, cache error reports) are
    /// appended to `output` as complete wire frames.
    pub fn process(
        &mut self,
        image: &mut DecodedImage,
        input: &[u8],
        crypto: Option<&SessionCrypto>,
        decompressor: &mut Decompressor,
        output: &mut WriteBuf,
    ) -> SessionResult<Vec<UpdateKind>> {
        let mut cursor = ReadCursor::new(input);

        let header = decode_cursor::<FastPathHeader>(&mut cursor).map_err(SessionError::decode)?;
        trace!(fast_path_header = ?header, "Received Fast-Path packet");

        if cursor.len() < header.data_length {
            return Err(reason_err!(
                "Fast-Path",
                "frame advertises {} payload bytes but carries {}",
                header.data_length,
                cursor.len()
            ));
        }
        let payload = cursor.read_slice(header.data_length);

        // Decrypt before looking at the update header.
        let decrypted;
        let payload = if header.flags.contains(EncryptionFlags::ENCRYPTED) {
            let crypto = crypto.ok_or_else(|| SessionError::new("Fast-Path", SessionErrorKind::CipherNotInitialized))?;
            decrypted = crypto.decrypt(payload);
            decrypted.as_slice()
        } else {
            payload
        };

        let update_pdu = opalrdp_core::decode::<FastPathUpdatePdu<'_>>(payload).map_err(SessionError::decode)?;
        trace!(fragmentation = ?update_pdu.fragmentation, update_code = ?update_pdu.update_code);

        let data = match (update_pdu.compression_flags, update_pdu.compression_type) {
            (Some(flags), Some(compression_type)) => decompressor
                .decompress(update_pdu.data, flags, compression_type)
                .map_err(SessionError::compression)?,
            _ => update_pdu.data.to_vec(),
        };

        let update_code = update_pdu.update_code;

        let Some(data) = self
            .complete_data
            .process_data(update_code, data, update_pdu.fragmentation)?
        else {
            return Ok(Vec::new());
        };

        let update = FastPathUpdate::decode_with_code(&data, update_code).map_err(SessionError::decode)?;

        match update {
            FastPathUpdate::Bitmap(bitmap_update) => {
                trace!("Received bitmap update with {} rectangles", bitmap_update.rectangles.len());

                let mut update_rectangle: Option<InclusiveRectangle> = None;

                for update in bitmap_update.rectangles {
                    let pixels = if update.compression_flags.contains(BitmapCompression::BITMAP_COMPRESSION) {
                        match rle::decompress(
                            update.bitmap_data,
                            &mut self.rle_buffer,
                            update.width,
                            update.height,
                            update.bits_per_pixel,
                        ) {
                            Ok(_) => self.rle_buffer.as_slice(),
                            Err(e) => {
                                warn!("Invalid RLE-compressed bitmap: {e}");
                                continue;
                            }
                        }
                    } else {
                        update.bitmap_data
                    };

                    image.apply_bottom_up_bitmap(&update.rectangle, update.bits_per_pixel, pixels);

                    // every drawn bitmap also feeds the tier caches
                    self.bitmap_caches
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .process(pixels, update.width, update.height, update.bits_per_pixel);

                    update_rectangle = Some(match update_rectangle {
                        Some(current) => current.union(&update.rectangle),
                        None => update.rectangle,
                    });
                }

                Ok(update_rectangle.map(UpdateKind::Region).into_iter().collect())
            }
            FastPathUpdate::CachedBitmap(cached_update) => {
                let mut update_rectangle: Option<InclusiveRectangle> = None;

                for reference in cached_update.rectangles {
                    let key = reference.key();

                    let cached = self
                        .bitmap_caches
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .lookup(reference.cache_id, key);

                    match cached {
                        Some(bitmap) => {
                            image.apply_bottom_up_bitmap(&reference.rectangle, bitmap.bits_per_pixel, &bitmap.pixels);

                            update_rectangle = Some(match update_rectangle {
                                Some(current) => current.union(&reference.rectangle),
                                None => reference.rectangle.clone(),
                            });
                        }
                        None => {
                            // soft error: ask the server to resend the bitmap
                            warn!(cache_id = reference.cache_id, key, "Bitmap cache miss");
                            self.send_cache_error(reference.cache_id, output)?;
                        }
                    }
                }

                Ok(update_rectangle.map(UpdateKind::Region).into_iter().collect())
            }
            FastPathUpdate::SurfaceCommands(surface_commands) => {
                trace!("Received {} surface commands", surface_commands.len());
                let update_region = self.process_surface_commands(image, output, surface_commands)?;
                Ok(update_region.map(UpdateKind::Region).into_iter().collect())
            }
            FastPathUpdate::Pointer(pointer) => match pointer {
                PointerUpdateData::SetHidden => Ok(vec![UpdateKind::PointerHidden]),
                PointerUpdateData::SetDefault => Ok(vec![UpdateKind::PointerDefault]),
                PointerUpdateData::SetPosition(position) => Ok(vec![UpdateKind::PointerPosition {
                    x: position.x,
                    y: position.y,
                }]),
                PointerUpdateData::Color(_) | PointerUpdateData::New(_) | PointerUpdateData::Large(_) => {
                    // cursor shape rendering lives outside the display core
                    debug!("Skipping pointer shape update");
                    Ok(Vec::new())
                }
            },
            FastPathUpdate::Unsupported { code, .. } => {
                debug!(?code, "Received unsupported Fast-Path update");
                Ok(Vec::new())
            }
        }
    }

    fn send_cache_error(&self, cache_id: u8, output: &mut WriteBuf) -> SessionResult<()> {
        let pdu = ShareDataPdu::BitmapCacheError(BitmapCacheErrorPdu::for_cache_miss(cache_id));

        encode_share_data(self.user_channel_id, self.io_channel_id, self.share_id, pdu, output)
            .map_err(SessionError::connector)?;

        Ok(())
    }

    fn process_surface_commands(
        &mut self,
        image: &mut DecodedImage,
        output: &mut WriteBuf,
        surface_commands: Vec<SurfaceCommand<'_>>,
    ) -> SessionResult<Option<InclusiveRectangle>> {
        let mut update_rectangle: Option<InclusiveRectangle> = None;

        let mut touch = |rectangle: InclusiveRectangle, region: &mut Option<InclusiveRectangle>| {
            *region = Some(match region.take() {
                Some(current) => current.union(&rectangle),
                None => rectangle,
            });
        };

        for command in surface_commands {
            match command {
                SurfaceCommand::SetSurfaceBits(bits) | SurfaceCommand::StreamSurfaceBits(bits) => {
                    let data = bits.extended_bitmap_data;

                    // Codec id zero carries raw top-down pixels; everything
                    // else would need a codec outside this core.
                    if data.codec_id != 0 {
                        warn!(codec_id = data.codec_id, "Skipping surface bits with unsupported codec");
                        continue;
                    }

                    image.draw_rectangle(
                        bits.destination.left,
                        bits.destination.top,
                        data.width,
                        data.height,
                        u16::from(data.bpp),
                        data.data,
                    );

                    touch(exclusive_to_inclusive(&bits.destination), &mut update_rectangle);
                }
                SurfaceCommand::FrameMarker(marker) => {
                    trace!(action = ?marker.frame_action, frame_id = marker.frame_id, "Frame marker");

                    if marker.frame_action == FrameAction::End {
                        let pdu = ShareDataPdu::FrameAcknowledge(FrameAcknowledgePdu {
                            frame_id: marker.frame_id.unwrap_or(0),
                        });

                        encode_share_data(self.user_channel_id, self.io_channel_id, self.share_id, pdu, output)
                            .map_err(SessionError::connector)?;
                    }
                }
                SurfaceCommand::CreateSurface(create) => {
                    let bytes_per_pixel = usize::from(create.bpp).div_ceil(8);
                    let size = usize::from(create.width) * usize::from(create.height) * bytes_per_pixel;

                    self.offscreen_cache.insert(
                        create.surface_id,
                        create.width,
                        create.height,
                        u16::from(create.bpp),
                        vec![0; size],
                    );
                }
                SurfaceCommand::DeleteSurface(delete) => {
                    self.offscreen_cache.remove(delete.surface_id);
                }
                SurfaceCommand::SolidFill(fill) => {
                    let bpp = usize::from(image.bits_per_pixel()).div_ceil(8);
                    let pixel = fill.fill_pixel.to_le_bytes();

                    for rectangle in &fill.rectangles {
                        let width = usize::from(rectangle.width());
                        let height = usize::from(rectangle.height());

                        let mut row = Vec::with_capacity(width * bpp);
                        for _ in 0..width {
                            row.extend_from_slice(&pixel[..bpp]);
                        }
                        let filled: Vec<u8> = row
                            .iter()
                            .copied()
                            .cycle()
                            .take(width * height * bpp)
                            .collect();

                        if let Some(surface) = self.offscreen_cache.get(fill.surface_id) {
                            let surface_id = surface.id;
                            blit_into_surface(&mut self.offscreen_cache, surface_id, rectangle, &filled);
                        } else {
                            image.draw_rectangle(
                                rectangle.left,
                                rectangle.top,
                                rectangle.width(),
                                rectangle.height(),
                                image.bits_per_pixel(),
                                &filled,
                            );
                            touch(exclusive_to_inclusive(rectangle), &mut update_rectangle);
                        }
                    }
                }
                SurfaceCommand::SurfaceToSurface(blit) => {
                    let Some((region, width, height, bpp)) =
                        copy_surface_region(&self.offscreen_cache, blit.source_surface_id, &blit.source_rectangle)
                    else {
                        warn!(surface_id = blit.source_surface_id, "Surface-to-surface from unknown surface");
                        continue;
                    };

                    for point in &blit.destination_points {
                        let destination = ExclusiveRectangle {
                            left: point.x,
                            top: point.y,
                            right: point.x.saturating_add(width),
                            bottom: point.y.saturating_add(height),
                        };

                        if self.offscreen_cache.get(blit.destination_surface_id).is_some() {
                            blit_into_surface(
                                &mut self.offscreen_cache,
                                blit.destination_surface_id,
                                &destination,
                                &region,
                            );
                        } else {
                            image.draw_rectangle(point.x, point.y, width, height, bpp, &region);
                            touch(exclusive_to_inclusive(&destination), &mut update_rectangle);
                        }
                    }
                }
                SurfaceCommand::SurfaceToCache(store) => {
                    let Some((region, width, height, bpp)) =
                        copy_surface_region(&self.offscreen_cache, store.surface_id, &store.source_rectangle)
                    else {
                        warn!(surface_id = store.surface_id, "Surface-to-cache from unknown surface");
                        continue;
                    };

                    self.offscreen_cache.insert(store.cache_slot, width, height, bpp, region);
                }
                SurfaceCommand::CacheToSurface(restore) => {
                    let Some(surface) = self.offscreen_cache.touch(restore.cache_slot) else {
                        warn!(slot = restore.cache_slot, "Cache-to-surface from unknown slot");
                        continue;
                    };

                    let (data, width, height, bpp) =
                        (surface.data.clone(), surface.width, surface.height, surface.bits_per_pixel);

                    for point in &restore.destination_points {
                        let destination = ExclusiveRectangle {
                            left: point.x,
                            top: point.y,
                            right: point.x.saturating_add(width),
                            bottom: point.y.saturating_add(height),
                        };

                        if self.offscreen_cache.get(restore.surface_id).is_some() {
                            blit_into_surface(&mut self.offscreen_cache, restore.surface_id, &destination, &data);
                        } else {
                            image.draw_rectangle(point.x, point.y, width, height, bpp, &data);
                            touch(exclusive_to_inclusive(&destination), &mut update_rectangle);
                        }
                    }
                }
                SurfaceCommand::Unknown { code, data } => {
                    // skipped by its declared size
                    debug!(code, size = data.len(), "Skipping unknown surface command");
                }
            }
        }

        Ok(update_rectangle)
    }
}

fn exclusive_to_inclusive(rectangle: &ExclusiveRectangle) -> InclusiveRectangle {
    InclusiveRectangle {
        left: rectangle.left,
        top: rectangle.top,
        right: rectangle.right.saturating_sub(1),
        bottom: rectangle.bottom.saturating_sub(1),
    }
}

/// Copies a top-down region out of an off-screen surface.
fn copy_surface_region(
    cache: &OffscreenCache,
    surface_id: u16,
    rectangle: &ExclusiveRectangle,
) -> Option<(Vec<u8>, u16, u16, u16)> {
    let surface = cache.get(surface_id)?;

    let bpp = usize::from(surface.bits_per_pixel).div_ceil(8);
    let surface_row_len = usize::from(surface.width) * bpp;
    let width = rectangle.width().min(surface.width.saturating_sub(rectangle.left));
    let height = rectangle.height().min(surface.height.saturating_sub(rectangle.top));
    let row_len = usize::from(width) * bpp;

    let mut region = Vec::with_capacity(row_len * usize::from(height));
    for y in 0..usize::from(height) {
        let offset = (usize::from(rectangle.top) + y) * surface_row_len + usize::from(rectangle.left) * bpp;
        region.extend_from_slice(&surface.data[offset..offset + row_len]);
    }

    Some((region, width, height, surface.bits_per_pixel))
}

/// Writes a top-down region into an off-screen surface.
fn blit_into_surface(cache: &mut OffscreenCache, surface_id: u16, destination: &ExclusiveRectangle, region: &[u8]) {
    let Some(surface) = cache.get(surface_id) else {
        return;
    };

    let bpp = usize::from(surface.bits_per_pixel).div_ceil(8);
    let surface_width = surface.width;
    let surface_height = surface.height;
    let surface_row_len = usize::from(surface_width) * bpp;

    let width = destination.width().min(surface_width.saturating_sub(destination.left));
    let height = destination.height().min(surface_height.saturating_sub(destination.top));
    let row_len = usize::from(width) * bpp;

    let mut data = surface.data.clone();
    for y in 0..usize::from(height) {
        let src_offset = y * row_len;
        if src_offset + row_len > region.len() {
            break;
        }
        let dst_offset = (usize::from(destination.top) + y) * surface_row_len + usize::from(destination.left) * bpp;
        data[dst_offset..dst_offset + row_len].copy_from_slice(&region[src_offset..src_offset + row_len]);
    }

    cache.update_data(surface_id, data);
}

/// Fragment reassembly, one buffer per update code.
#[derive(Debug, Default)]
struct CompleteData {
    fragments: HashMap<u8, Vec<u8>>,
}

impl CompleteData {
    fn new() -> Self {
        Self::default()
    }

    fn process_data(
        &mut self,
        update_code: UpdateCode,
        data: Vec<u8>,
        fragmentation: Fragmentation,
    ) -> SessionResult<Option<Vec<u8>>> {
        let code = update_code.as_u8();

        match fragmentation {
            Fragmentation::Single => {
                if self.fragments.remove(&code).is_some() {
                    warn!(?update_code, "Dropping incomplete fragmented update");
                }

                Ok(Some(data))
            }
            Fragmentation::First => {
                if self.fragments.insert(code, data).is_some() {
                    warn!(?update_code, "Dropping incomplete fragmented update");
                }

                Ok(None)
            }
            Fragmentation::Next | Fragmentation::Last => {
                let Some(buffer) = self.fragments.get_mut(&code) else {
                    warn!(?update_code, "Fragment continuation without a FIRST fragment");
                    return Ok(None);
                };

                buffer.extend_from_slice(&data);

                if buffer.len() > MAX_FRAGMENTED_UPDATE_SIZE {
                    self.fragments.remove(&code);
                    return Err(reason_err!(
                        "Fast-Path",
                        "fragmented update outgrew the {MAX_FRAGMENTED_UPDATE_SIZE} byte reassembly bound"
                    ));
                }

                if fragmentation == Fragmentation::Last {
                    Ok(self.fragments.remove(&code))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_fragment_passes_through() {
        let mut complete_data = CompleteData::new();

        let result = complete_data
            .process_data(UpdateCode::Bitmap, vec![1, 2, 3], Fragmentation::Single)
            .unwrap();

        assert_eq!(result, Some(vec![1, 2, 3]));
    }

    #[test]
    fn fragments_accumulate_per_update_code() {
        let mut complete_data = CompleteData::new();

        assert_eq!(
            complete_data
                .process_data(UpdateCode::SurfaceCommands, vec![1, 2], Fragmentation::First)
                .unwrap(),
            None
        );
        // an interleaved update with a different code keeps its own buffer
        assert_eq!(
            complete_data
                .process_data(UpdateCode::Bitmap, vec![9], Fragmentation::Single)
                .unwrap(),
            Some(vec![9])
        );
        assert_eq!(
            complete_data
                .process_data(UpdateCode::SurfaceCommands, vec![3], Fragmentation::Next)
                .unwrap(),
            None
        );
        assert_eq!(
            complete_data
                .process_data(UpdateCode::SurfaceCommands, vec![4, 5], Fragmentation::Last)
                .unwrap(),
            Some(vec![1, 2, 3, 4, 5])
        );
    }

    #[test]
    fn continuation_without_first_is_dropped() {
        let mut complete_data = CompleteData::new();

        let result = complete_data
            .process_data(UpdateCode::Bitmap, vec![1], Fragmentation::Last)
            .unwrap();

        assert_eq!(result, None);
    }
}
