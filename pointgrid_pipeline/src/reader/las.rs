//! Reader for uncompressed LAS point clouds (1.2 – 1.4, point formats
//! 0 – 10).
//!
//! The header is parsed once when the reader is opened; every `read`
//! invocation opens its own file handle, so concurrent tile reads never
//! share seek state.

use super::{PointReader, PolygonClip, QuickInfo, ReaderOptions};
use anyhow::{Context, Result, ensure};
use async_trait::async_trait;
use byteorder::{LittleEndian, ReadBytesExt};
use pointgrid_core::{GeoRect, PointBatch};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Attribute columns the LAS reader materializes, in stable order.
pub const LAS_ATTRIBUTES: [&str; 7] = [
	"X",
	"Y",
	"Z",
	"Intensity",
	"ReturnNumber",
	"NumberOfReturns",
	"Classification",
];

const WKT_CRS_RECORD_ID: u16 = 2112;

#[derive(Clone, Debug)]
struct LasHeader {
	version: (u8, u8),
	header_size: u16,
	offset_to_points: u32,
	vlr_count: u32,
	point_format: u8,
	record_len: u16,
	point_count: u64,
	scale: [f64; 3],
	offset: [f64; 3],
	min: [f64; 2],
	max: [f64; 2],
}

/// Reader over a single `.las` file.
#[derive(Debug)]
pub struct LasReader {
	path: PathBuf,
	header: LasHeader,
	srs: Option<String>,
	clip: Option<PolygonClip>,
	options: ReaderOptions,
}

impl LasReader {
	/// Opens a LAS file, parsing the header and the WKT CRS record.
	pub fn open(path: &Path, options: ReaderOptions) -> Result<LasReader> {
		let mut file = BufReader::new(
			File::open(path).with_context(|| format!("cannot open '{}'", path.display()))?,
		);
		let header = parse_header(&mut file).with_context(|| format!("invalid LAS header in '{}'", path.display()))?;
		let srs = read_wkt_vlr(&mut file, &header)?;

		let clip = match &options.polygon {
			Some(wkt) => Some(PolygonClip::from_wkt(wkt)?),
			None => None,
		};

		log::debug!(
			"opened '{}': LAS {}.{}, format {}, {} points",
			path.display(),
			header.version.0,
			header.version.1,
			header.point_format,
			header.point_count
		);

		Ok(LasReader {
			path: path.to_path_buf(),
			header,
			srs,
			clip,
			options,
		})
	}

	/// The reader options this handle was opened with.
	#[must_use]
	pub fn options(&self) -> &ReaderOptions {
		&self.options
	}
}

#[async_trait]
impl PointReader for LasReader {
	async fn quick_info(&self) -> Result<QuickInfo> {
		Ok(QuickInfo {
			bounds: GeoRect::new(
				self.header.min[0],
				self.header.min[1],
				self.header.max[0],
				self.header.max[1],
			)?,
			srs: self.srs.clone(),
			point_count: self.header.point_count,
		})
	}

	async fn read(&self, rect: &GeoRect) -> Result<Option<PointBatch>> {
		let header = self.header.clone();
		let path = self.path.clone();
		let rect = *rect;
		let clip = self.clip.clone();

		let batch = tokio::task::spawn_blocking(move || read_points(&path, &header, &rect, clip.as_ref())).await??;
		Ok(batch)
	}
}

fn read_string(buf: &[u8]) -> String {
	String::from_utf8_lossy(buf)
		.trim_end_matches('\0')
		.to_string()
}

fn parse_header<R: Read>(input: &mut R) -> Result<LasHeader> {
	let mut signature = [0u8; 4];
	input.read_exact(&mut signature)?;
	ensure!(&signature == b"LASF", "not a LAS file (bad signature)");

	// file source id, global encoding, GUID, up to the version fields
	let mut skip = [0u8; 20];
	input.read_exact(&mut skip)?;

	let version = (input.read_u8()?, input.read_u8()?);
	ensure!(
		version.0 == 1 && (2..=4).contains(&version.1),
		"unsupported LAS version {}.{}",
		version.0,
		version.1
	);

	// system identifier, generating software, creation day/year
	let mut skip = [0u8; 68];
	input.read_exact(&mut skip)?;

	let header_size = input.read_u16::<LittleEndian>()?;
	let offset_to_points = input.read_u32::<LittleEndian>()?;
	let vlr_count = input.read_u32::<LittleEndian>()?;

	let format_raw = input.read_u8()?;
	ensure!(
		format_raw & 0xC0 == 0,
		"compressed (LAZ) input is not supported"
	);
	let point_format = format_raw & 0x3F;
	ensure!(point_format <= 10, "unsupported point format {point_format}");

	let record_len = input.read_u16::<LittleEndian>()?;
	ensure!(
		record_len as usize >= point_record_min_len(point_format),
		"point record length {record_len} too small for format {point_format}"
	);

	let legacy_count = input.read_u32::<LittleEndian>()?;
	let mut skip = [0u8; 20]; // legacy by-return counts
	input.read_exact(&mut skip)?;

	let scale = [
		input.read_f64::<LittleEndian>()?,
		input.read_f64::<LittleEndian>()?,
		input.read_f64::<LittleEndian>()?,
	];
	let offset = [
		input.read_f64::<LittleEndian>()?,
		input.read_f64::<LittleEndian>()?,
		input.read_f64::<LittleEndian>()?,
	];

	let max_x = input.read_f64::<LittleEndian>()?;
	let min_x = input.read_f64::<LittleEndian>()?;
	let max_y = input.read_f64::<LittleEndian>()?;
	let min_y = input.read_f64::<LittleEndian>()?;
	let _max_z = input.read_f64::<LittleEndian>()?;
	let _min_z = input.read_f64::<LittleEndian>()?;

	let mut point_count = u64::from(legacy_count);
	if version.1 == 4 {
		// waveform offset, EVLR offset/count
		let mut skip = [0u8; 20];
		input.read_exact(&mut skip)?;
		let count_14 = input.read_u64::<LittleEndian>()?;
		if count_14 > 0 {
			point_count = count_14;
		}
	}

	Ok(LasHeader {
		version,
		header_size,
		offset_to_points,
		vlr_count,
		point_format,
		record_len,
		point_count,
		scale,
		offset,
		min: [min_x, min_y],
		max: [max_x, max_y],
	})
}

/// Scans the variable-length records for the coordinate system WKT.
fn read_wkt_vlr<R: Read + Seek>(input: &mut R, header: &LasHeader) -> Result<Option<String>> {
	input.seek(SeekFrom::Start(u64::from(header.header_size)))?;

	for _ in 0..header.vlr_count {
		let _reserved = input.read_u16::<LittleEndian>()?;
		let mut user_id = [0u8; 16];
		input.read_exact(&mut user_id)?;
		let record_id = input.read_u16::<LittleEndian>()?;
		let record_len = input.read_u16::<LittleEndian>()?;
		let mut description = [0u8; 32];
		input.read_exact(&mut description)?;

		let mut payload = vec![0u8; record_len as usize];
		input.read_exact(&mut payload)?;

		if read_string(&user_id) == "LASF_Projection" && record_id == WKT_CRS_RECORD_ID {
			return Ok(Some(read_string(&payload)));
		}
	}
	Ok(None)
}

fn point_record_min_len(format: u8) -> usize {
	match format {
		0 => 20,
		1 => 28,
		2 => 26,
		3 => 34,
		4 => 57,
		5 => 63,
		6 => 30,
		7 => 36,
		8 => 38,
		9 => 59,
		_ => 67,
	}
}

fn read_points(
	path: &Path,
	header: &LasHeader,
	rect: &GeoRect,
	clip: Option<&PolygonClip>,
) -> Result<Option<PointBatch>> {
	let mut file = BufReader::new(File::open(path)?);
	file.seek(SeekFrom::Start(u64::from(header.offset_to_points)))?;

	let extended = header.point_format >= 6;
	let record_len = header.record_len as usize;
	let mut record = vec![0u8; record_len];

	let mut xs = Vec::new();
	let mut ys = Vec::new();
	let mut zs = Vec::new();
	let mut intensities = Vec::new();
	let mut return_numbers = Vec::new();
	let mut number_of_returns = Vec::new();
	let mut classifications = Vec::new();

	for _ in 0..header.point_count {
		file.read_exact(&mut record)?;

		let x = f64::from((&record[0..4]).read_i32::<LittleEndian>()?) * header.scale[0] + header.offset[0];
		let y = f64::from((&record[4..8]).read_i32::<LittleEndian>()?) * header.scale[1] + header.offset[1];
		if !rect.contains_point(x, y) {
			continue;
		}
		if let Some(clip) = clip
			&& !clip.contains(x, y)
		{
			continue;
		}

		let z = f64::from((&record[8..12]).read_i32::<LittleEndian>()?) * header.scale[2] + header.offset[2];
		let intensity = (&record[12..14]).read_u16::<LittleEndian>()?;

		let (return_number, returns, classification) = if extended {
			let returns_byte = record[14];
			(returns_byte & 0x0F, returns_byte >> 4, record[16])
		} else {
			let returns_byte = record[14];
			(returns_byte & 0x07, (returns_byte >> 3) & 0x07, record[15] & 0x1F)
		};

		xs.push(x);
		ys.push(y);
		zs.push(z);
		intensities.push(f64::from(intensity));
		return_numbers.push(f64::from(return_number));
		number_of_returns.push(f64::from(returns));
		classifications.push(f64::from(classification));
	}

	if xs.is_empty() {
		return Ok(None);
	}

	let mut batch = PointBatch::new();
	for (name, values) in LAS_ATTRIBUTES.iter().zip([
		xs,
		ys,
		zs,
		intensities,
		return_numbers,
		number_of_returns,
		classifications,
	]) {
		batch.push_column(name, values)?;
	}
	Ok(Some(batch))
}
