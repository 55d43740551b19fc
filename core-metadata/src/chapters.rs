//! Chapter marks without a full decode.
//!
//! Three layouts are understood:
//!
//! - ID3v2 `CHAP` frames (v2.3 plain sizes, v2.4 syncsafe sizes) with an
//!   optional `TIT2` sub-frame for the title.
//! - MP4 Nero chapters in `moov/udta/chpl`, or else the QuickTime chapter
//!   track named by `moov/trak/tref/chap`: a text track whose samples carry
//!   the titles and whose sample times carry the starts.
//! - Vorbis comments `CHAPTERnnn=HH:MM:SS.mmm` and `CHAPTERnnnNAME=...`.
//!
//! Bulk extraction only needs [`ChapterScan::present`]; the listing is built
//! by [`read_chapters`] when an item is opened for playback.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::tag::{ItemKey, Tag};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::extractor::probe;

/// One chapter of a media item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Zero-based position in the listing
    pub index: usize,
    pub title: String,
    pub start_secs: f64,
    pub end_secs: f64,
}

/// Chapter start as stored in the container, before ends are resolved.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Mark {
    pub title: Option<String>,
    pub start_secs: f64,
    pub end_secs: Option<f64>,
}

#[derive(Debug, Default)]
pub(crate) struct ChapterScan {
    pub present: bool,
    pub marks: Vec<Mark>,
}

/// Largest tag or atom body read into memory.
const MAX_BLOCK: u64 = 64 * 1024 * 1024;

/// Whether `path` carries chapter marks.
pub fn detect(path: &Path) -> Result<bool> {
    let tagged = probe(path)?;
    let tags: Vec<&Tag> = tagged.tags().iter().collect();
    Ok(scan(path, &tags)?.present)
}

/// Ordered chapter listing for `path`; empty when the file has none.
pub fn read_chapters(path: &Path) -> Result<Vec<Chapter>> {
    let tagged = probe(path)?;
    let duration = tagged.properties().duration().as_secs_f64();
    let tags: Vec<&Tag> = tagged.tags().iter().collect();
    Ok(resolve(scan(path, &tags)?.marks, duration))
}

/// Raw scan shared by [`detect`], [`read_chapters`] and bulk extraction.
pub(crate) fn scan(path: &Path, tags: &[&Tag]) -> Result<ChapterScan> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 8];
    let read = read_up_to(&mut reader, &mut magic)?;
    reader.seek(SeekFrom::Start(0))?;

    let mut result = if read >= 3 && &magic[..3] == b"ID3" {
        id3::scan(&mut reader)?
    } else if read >= 8 && &magic[4..8] == b"ftyp" {
        mp4::scan(&mut reader)?
    } else {
        ChapterScan::default()
    };

    if result.marks.is_empty() {
        let marks = vorbis::marks(tags);
        if !marks.is_empty() {
            result.present = true;
            result.marks = marks;
        }
    }

    Ok(result)
}

/// Sorts marks, fills titles and derives missing ends from the next start or
/// the total duration.
pub(crate) fn resolve(mut marks: Vec<Mark>, duration_secs: f64) -> Vec<Chapter> {
    marks.retain(|m| m.start_secs.is_finite() && m.start_secs >= 0.0);
    marks.sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));

    let starts: Vec<f64> = marks.iter().map(|m| m.start_secs).collect();
    marks
        .into_iter()
        .enumerate()
        .map(|(index, mark)| {
            let next = starts.get(index + 1).copied().unwrap_or(duration_secs);
            let end = mark
                .end_secs
                .filter(|end| *end > mark.start_secs)
                .unwrap_or(next)
                .max(mark.start_secs);
            Chapter {
                index,
                title: mark
                    .title
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| format!("Chapter {}", index + 1)),
                start_secs: mark.start_secs,
                end_secs: end,
            }
        })
        .collect()
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn read_block<R: Read>(reader: &mut R, len: u64) -> Result<Vec<u8>> {
    let len = len.min(MAX_BLOCK);
    let mut body = Vec::new();
    reader.take(len).read_to_end(&mut body)?;
    Ok(body)
}

fn be_u32(bytes: &[u8]) -> Option<u32> {
    Some(u32::from_be_bytes(bytes.get(..4)?.try_into().ok()?))
}

fn be_u64(bytes: &[u8]) -> Option<u64> {
    Some(u64::from_be_bytes(bytes.get(..8)?.try_into().ok()?))
}

mod id3 {
    use super::*;

    const HEADER_LEN: usize = 10;

    fn syncsafe(bytes: &[u8]) -> Option<u32> {
        let b = bytes.get(..4)?;
        if b.iter().any(|byte| byte & 0x80 != 0) {
            return None;
        }
        Some(
            (u32::from(b[0]) << 21)
                | (u32::from(b[1]) << 14)
                | (u32::from(b[2]) << 7)
                | u32::from(b[3]),
        )
    }

    pub(super) fn scan<R: Read + Seek>(reader: &mut R) -> Result<ChapterScan> {
        let mut header = [0u8; HEADER_LEN];
        if read_up_to(reader, &mut header)? < HEADER_LEN {
            return Ok(ChapterScan::default());
        }
        let version = header[3];
        let flags = header[5];
        let Some(size) = syncsafe(&header[6..10]) else {
            return Ok(ChapterScan::default());
        };
        if version != 3 && version != 4 {
            return Ok(ChapterScan::default());
        }

        let body = read_block(reader, u64::from(size))?;
        let start = if flags & 0x40 != 0 {
            extended_header_len(&body, version).unwrap_or(body.len())
        } else {
            0
        };

        let marks = parse_frames(body.get(start..).unwrap_or_default(), version);
        Ok(ChapterScan {
            present: !marks.is_empty(),
            marks,
        })
    }

    fn extended_header_len(body: &[u8], version: u8) -> Option<usize> {
        if version == 4 {
            syncsafe(body).map(|len| len as usize)
        } else {
            be_u32(body).map(|len| len as usize + 4)
        }
    }

    fn frame_size(bytes: &[u8], version: u8) -> Option<usize> {
        if version == 4 {
            syncsafe(bytes).map(|s| s as usize)
        } else {
            be_u32(bytes).map(|s| s as usize)
        }
    }

    /// Walks `(id, body)` pairs until padding or truncation.
    fn frames(mut data: &[u8], version: u8) -> Vec<([u8; 4], &[u8])> {
        let mut out = Vec::new();
        while data.len() >= HEADER_LEN && data[0] != 0 {
            let mut id = [0u8; 4];
            id.copy_from_slice(&data[..4]);
            let Some(size) = frame_size(&data[4..8], version) else {
                break;
            };
            let end = HEADER_LEN + size;
            if end > data.len() {
                break;
            }
            out.push((id, &data[HEADER_LEN..end]));
            data = &data[end..];
        }
        out
    }

    pub(super) fn parse_frames(data: &[u8], version: u8) -> Vec<Mark> {
        frames(data, version)
            .into_iter()
            .filter(|(id, _)| id == b"CHAP")
            .filter_map(|(_, body)| parse_chap(body, version))
            .collect()
    }

    fn parse_chap(body: &[u8], version: u8) -> Option<Mark> {
        let id_end = body.iter().position(|b| *b == 0)?;
        let times = body.get(id_end + 1..id_end + 17)?;
        let start_ms = be_u32(&times[0..4])?;
        let end_ms = be_u32(&times[4..8])?;

        let title = frames(&body[id_end + 17..], version)
            .into_iter()
            .find(|(id, _)| id == b"TIT2")
            .and_then(|(_, text)| decode_text(text));

        Some(Mark {
            title,
            start_secs: f64::from(start_ms) / 1000.0,
            end_secs: Some(f64::from(end_ms) / 1000.0),
        })
    }

    pub(super) fn decode_text(frame: &[u8]) -> Option<String> {
        let (encoding, raw) = frame.split_first()?;
        let text = match encoding {
            0 => raw.iter().map(|b| char::from(*b)).collect::<String>(),
            1 | 2 => {
                let (big_endian, units) = match raw {
                    [0xFE, 0xFF, rest @ ..] => (true, rest),
                    [0xFF, 0xFE, rest @ ..] => (false, rest),
                    _ => (*encoding == 2, raw),
                };
                let words: Vec<u16> = units
                    .chunks_exact(2)
                    .map(|pair| {
                        if big_endian {
                            u16::from_be_bytes([pair[0], pair[1]])
                        } else {
                            u16::from_le_bytes([pair[0], pair[1]])
                        }
                    })
                    .collect();
                String::from_utf16_lossy(&words)
            }
            3 => String::from_utf8_lossy(raw).into_owned(),
            _ => return None,
        };

        let text = text.trim_end_matches('\0').trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

mod mp4 {
    use super::*;

    /// Atom header: total size and type. A size of 0 runs to the end of the
    /// enclosing region.
    fn atoms(mut data: &[u8]) -> Vec<([u8; 4], &[u8])> {
        let mut out = Vec::new();
        while data.len() >= 8 {
            let Some(size32) = be_u32(data) else { break };
            let mut kind = [0u8; 4];
            kind.copy_from_slice(&data[4..8]);
            let (header, size) = match size32 {
                0 => (8, data.len()),
                1 => match be_u64(&data[8..]) {
                    Some(size) => (16, size as usize),
                    None => break,
                },
                size => (8, size as usize),
            };
            if size < header || size > data.len() {
                break;
            }
            out.push((kind, &data[header..size]));
            data = &data[size..];
        }
        out
    }

    fn child<'a>(data: &'a [u8], kind: &[u8; 4]) -> Option<&'a [u8]> {
        atoms(data)
            .into_iter()
            .find(|(k, _)| k == kind)
            .map(|(_, body)| body)
    }

    pub(super) fn scan<R: Read + Seek>(reader: &mut R) -> Result<ChapterScan> {
        let Some(moov) = find_moov(reader)? else {
            return Ok(ChapterScan::default());
        };
        let mut result = scan_moov(&moov);
        if result.present && result.marks.is_empty() {
            result.marks = chapter_track_marks(&moov, reader)?;
        }
        Ok(result)
    }

    /// Skips top-level atoms (`mdat` can be gigabytes) until `moov`.
    fn find_moov<R: Read + Seek>(reader: &mut R) -> Result<Option<Vec<u8>>> {
        loop {
            let mut header = [0u8; 8];
            if read_up_to(reader, &mut header)? < 8 {
                return Ok(None);
            }
            let size32 = u64::from(u32::from_be_bytes([header[0], header[1], header[2], header[3]]));
            let (body_len, is_open_ended) = match size32 {
                0 => (u64::MAX, true),
                1 => {
                    let mut large = [0u8; 8];
                    if read_up_to(reader, &mut large)? < 8 {
                        return Ok(None);
                    }
                    match u64::from_be_bytes(large).checked_sub(16) {
                        Some(len) => (len, false),
                        None => return Ok(None),
                    }
                }
                size if size < 8 => return Ok(None),
                size => (size - 8, false),
            };

            if &header[4..8] == b"moov" {
                return read_block(reader, body_len).map(Some);
            }
            if is_open_ended {
                return Ok(None);
            }
            let Ok(offset) = i64::try_from(body_len) else {
                return Ok(None);
            };
            reader.seek(SeekFrom::Current(offset))?;
        }
    }

    pub(super) fn scan_moov(moov: &[u8]) -> ChapterScan {
        let marks = child(moov, b"udta")
            .and_then(|udta| child(udta, b"chpl"))
            .map(parse_chpl)
            .unwrap_or_default();

        let chapter_track = atoms(moov)
            .into_iter()
            .filter(|(kind, _)| kind == b"trak")
            .filter_map(|(_, trak)| child(trak, b"tref"))
            .any(|tref| child(tref, b"chap").is_some());

        ChapterScan {
            present: !marks.is_empty() || chapter_track,
            marks,
        }
    }

    /// Upper bound on rows read from a sample table.
    const MAX_SAMPLES: usize = 100_000;

    struct Sample {
        offset: u64,
        size: u32,
        start: u64,
        duration: u64,
    }

    /// Sample layout of a QuickTime text track, in media time units.
    struct TextTrack {
        timescale: u32,
        samples: Vec<Sample>,
    }

    impl TextTrack {
        fn parse(trak: &[u8]) -> Option<Self> {
            let mdia = child(trak, b"mdia")?;
            let mdhd = child(mdia, b"mdhd")?;
            let at = if *mdhd.first()? == 1 { 20 } else { 12 };
            let timescale = be_u32(mdhd.get(at..)?).filter(|t| *t > 0)?;
            let stbl = child(child(mdia, b"minf")?, b"stbl")?;

            let durations: Vec<u64> = table(child(stbl, b"stts")?, 4, 8)?
                .into_iter()
                .flat_map(|row| {
                    let count = be_u32(row).unwrap_or(0) as usize;
                    let delta = be_u32(&row[4..]).map(u64::from).unwrap_or(0);
                    std::iter::repeat(delta).take(count.min(MAX_SAMPLES))
                })
                .take(MAX_SAMPLES)
                .collect();

            let stsz = child(stbl, b"stsz")?;
            let sizes: Vec<u32> = match be_u32(stsz.get(4..)?)? {
                0 => table(stsz, 8, 4)?.into_iter().filter_map(be_u32).collect(),
                uniform => {
                    let count = be_u32(stsz.get(8..)?)? as usize;
                    vec![uniform; count.min(MAX_SAMPLES)]
                }
            };

            let chunk_offsets: Vec<u64> = match child(stbl, b"stco") {
                Some(stco) => table(stco, 4, 4)?
                    .into_iter()
                    .filter_map(be_u32)
                    .map(u64::from)
                    .collect(),
                None => table(child(stbl, b"co64")?, 4, 8)?
                    .into_iter()
                    .filter_map(be_u64)
                    .collect(),
            };
            // (first chunk, samples per chunk), ascending by first chunk
            let runs: Vec<(u32, u32)> = table(child(stbl, b"stsc")?, 4, 12)?
                .into_iter()
                .filter_map(|row| Some((be_u32(row)?, be_u32(&row[4..])?)))
                .collect();

            let mut samples = Vec::new();
            let mut start = 0u64;
            'chunks: for (index, chunk_offset) in chunk_offsets.iter().enumerate() {
                let chunk = index as u32 + 1;
                let per_chunk = runs
                    .iter()
                    .rev()
                    .find(|(first, _)| *first <= chunk)
                    .map_or(0, |(_, n)| *n);
                let mut offset = *chunk_offset;
                for _ in 0..per_chunk {
                    let next = samples.len();
                    let (Some(&size), Some(&duration)) = (sizes.get(next), durations.get(next)) else {
                        break 'chunks;
                    };
                    samples.push(Sample {
                        offset,
                        size,
                        start,
                        duration,
                    });
                    offset += u64::from(size);
                    start += duration;
                }
            }
            Some(Self { timescale, samples })
        }
    }

    /// Rows of a full-box table: the row count sits at `count_at`, rows of
    /// `row` bytes follow it.
    fn table(body: &[u8], count_at: usize, row: usize) -> Option<Vec<&[u8]>> {
        let count = be_u32(body.get(count_at..)?)? as usize;
        let rows = body.get(count_at + 4..)?;
        if count > MAX_SAMPLES || rows.len() < count * row {
            return None;
        }
        Some(rows.chunks_exact(row).take(count).collect())
    }

    fn track_id(trak: &[u8]) -> Option<u32> {
        let tkhd = child(trak, b"tkhd")?;
        let at = if *tkhd.first()? == 1 { 20 } else { 12 };
        be_u32(tkhd.get(at..)?)
    }

    /// Reads one mark per sample of the text track referenced by `tref/chap`.
    fn chapter_track_marks<R: Read + Seek>(moov: &[u8], reader: &mut R) -> Result<Vec<Mark>> {
        let traks: Vec<&[u8]> = atoms(moov)
            .into_iter()
            .filter(|(kind, _)| kind == b"trak")
            .map(|(_, trak)| trak)
            .collect();
        let referenced: Vec<u32> = traks
            .iter()
            .filter_map(|trak| child(trak, b"tref"))
            .filter_map(|tref| child(tref, b"chap"))
            .flat_map(|chap| chap.chunks_exact(4).filter_map(be_u32).collect::<Vec<_>>())
            .collect();
        let track = traks
            .iter()
            .find(|trak| track_id(trak).is_some_and(|id| referenced.contains(&id)))
            .and_then(|trak| TextTrack::parse(trak));
        let Some(track) = track else {
            return Ok(Vec::new());
        };

        let scale = f64::from(track.timescale);
        let mut marks = Vec::with_capacity(track.samples.len());
        for sample in &track.samples {
            reader.seek(SeekFrom::Start(sample.offset))?;
            let body = read_block(reader, u64::from(sample.size))?;
            marks.push(Mark {
                title: sample_text(&body),
                start_secs: sample.start as f64 / scale,
                end_secs: Some((sample.start + sample.duration) as f64 / scale),
            });
        }
        Ok(marks)
    }

    /// `len u16` then the text, UTF-8 or UTF-16 behind a byte order mark.
    /// Anything after the text (an `encd` atom) is ignored.
    pub(super) fn sample_text(sample: &[u8]) -> Option<String> {
        let len = usize::from(u16::from_be_bytes([*sample.first()?, *sample.get(1)?]));
        let text = sample.get(2..2 + len)?;
        let decoded = match text {
            [0xFE, 0xFF, rest @ ..] => {
                let units: Vec<u16> = rest
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            _ => String::from_utf8_lossy(text).into_owned(),
        };
        let decoded = decoded.trim().to_string();
        (!decoded.is_empty()).then_some(decoded)
    }

    /// `version u8, flags u24, [reserved u32 if version > 0], count u8`,
    /// then per chapter `start u64 (100ns units), len u8, title`.
    pub(super) fn parse_chpl(body: &[u8]) -> Vec<Mark> {
        let Some(version) = body.first() else {
            return Vec::new();
        };
        let mut pos = if *version == 0 { 4 } else { 8 };
        let Some(count) = body.get(pos) else {
            return Vec::new();
        };
        pos += 1;

        let mut marks = Vec::with_capacity(usize::from(*count));
        for _ in 0..*count {
            let Some(start) = body.get(pos..).and_then(be_u64) else {
                break;
            };
            let Some(len) = body.get(pos + 8) else { break };
            let title_start = pos + 9;
            let Some(title) = body.get(title_start..title_start + usize::from(*len)) else {
                break;
            };
            marks.push(Mark {
                title: Some(String::from_utf8_lossy(title).trim().to_string()),
                start_secs: start as f64 / 10_000_000.0,
                end_secs: None,
            });
            pos = title_start + usize::from(*len);
        }
        marks
    }
}

mod vorbis {
    use super::*;

    pub(super) fn marks(tags: &[&Tag]) -> Vec<Mark> {
        let mut starts: Vec<(String, f64)> = Vec::new();
        let mut names: Vec<(String, String)> = Vec::new();

        for tag in tags {
            for item in tag.items() {
                let ItemKey::Unknown(key) = item.key() else {
                    continue;
                };
                let key = key.to_ascii_uppercase();
                let Some(rest) = key.strip_prefix("CHAPTER") else {
                    continue;
                };
                let Some(value) = item.value().text() else {
                    continue;
                };
                let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                if digits.is_empty() {
                    continue;
                }
                match &rest[digits.len()..] {
                    "" => {
                        if let Some(secs) = parse_timestamp(value) {
                            starts.push((digits, secs));
                        }
                    }
                    "NAME" => names.push((digits, value.trim().to_string())),
                    _ => {}
                }
            }
        }

        starts
            .into_iter()
            .map(|(number, start_secs)| Mark {
                title: names
                    .iter()
                    .find(|(n, _)| *n == number)
                    .map(|(_, name)| name.clone()),
                start_secs,
                end_secs: None,
            })
            .collect()
    }

    /// `HH:MM:SS.mmm`, also accepting `MM:SS` and plain seconds.
    pub(super) fn parse_timestamp(value: &str) -> Option<f64> {
        let mut total = 0.0;
        for part in value.trim().split(':') {
            let component: f64 = part.trim().parse().ok()?;
            if component < 0.0 {
                return None;
            }
            total = total * 60.0 + component;
        }
        total.is_finite().then_some(total)
    }
}
