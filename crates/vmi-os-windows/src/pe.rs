//! Minimal PE header parsing: just enough to recognize the ntoskrnl image
//! header and locate its `.data` section for the "faster" KDBG locator.
//!
//! Parsed through the `object` crate's PE primitives rather than hand-rolled
//! byte offsets, generic over PE32/PE32+ via [`ImageNtHeaders`] the same way
//! this workspace's other PE reader does for on-disk images. Only the fields
//! the locator touches are modeled — the export directory's own module-name
//! RVA (to confirm an image is ntoskrnl.exe) and the section table (to find
//! `.data`). Everything else about the PE format is out of scope here.

use object::{
    endian::LittleEndian as LE,
    pe::{
        ImageDataDirectory, ImageDosHeader, ImageExportDirectory, ImageNtHeaders32,
        ImageNtHeaders64, ImageSectionHeader, IMAGE_DIRECTORY_ENTRY_EXPORT, IMAGE_DOS_SIGNATURE,
        IMAGE_NT_OPTIONAL_HDR32_MAGIC, IMAGE_NT_OPTIONAL_HDR64_MAGIC, IMAGE_NT_SIGNATURE,
    },
    read::{
        pe::{optional_header_magic, ImageNtHeaders, ImageOptionalHeader},
        ReadRef,
    },
};
use vmi_core::{Memory, Pa, VmiError};

/// A parsed-just-enough PE header, anchored at a physical base address.
///
/// RVAs are resolved against `image_base_pa` directly, i.e. this assumes
/// the image's header-adjacent pages are physically contiguous from its
/// base. That holds for the export directory and `.data` section this
/// locator reads in practice, but is not a general PE-loading guarantee.
pub struct PeHeader {
    image_base_pa: Pa,
    export_name_rva: u32,
    data_section: Option<(u32, u32)>,
}

impl PeHeader {
    /// Parses the PE header at `image_base_pa`.
    ///
    /// Returns `Ok(None)` for any page that doesn't look like a PE image
    /// header — that's the common case while scanning, not an error.
    pub fn parse(mem: &Memory<'_>, image_base_pa: Pa) -> Result<Option<Self>, VmiError> {
        let page = mem.read_page(image_base_pa)?;
        let data: &[u8] = &page;

        let magic = match optional_header_magic(data) {
            Ok(magic) => magic,
            Err(_) => return Ok(None),
        };

        let headers = match magic {
            IMAGE_NT_OPTIONAL_HDR32_MAGIC => parse_headers::<ImageNtHeaders32>(data),
            IMAGE_NT_OPTIONAL_HDR64_MAGIC => parse_headers::<ImageNtHeaders64>(data),
            _ => return Ok(None),
        };

        let Some((export_rva, export_size, sections)) = headers else {
            return Ok(None);
        };
        if export_rva == 0 || export_size == 0 {
            return Ok(None);
        }

        let export_name_rva = read_export_name_rva(mem, image_base_pa, export_rva)?;

        let data_section = sections
            .iter()
            .find(|section| section.name.starts_with(b".data"))
            .map(|section| (section.virtual_address.get(LE), section.virtual_size.get(LE)));

        Ok(Some(Self {
            image_base_pa,
            export_name_rva,
            data_section,
        }))
    }

    /// Checks the export directory's own module-name string against `name`.
    pub fn names_module(&self, mem: &Memory<'_>, name: &[u8]) -> Result<bool, VmiError> {
        let name_pa = self.image_base_pa + self.export_name_rva as u64;
        let bytes = read_physical_range(mem, name_pa, name.len() + 1)?;
        Ok(bytes.get(..name.len()) == Some(name) && bytes.get(name.len()) == Some(&0))
    }

    /// Reads the full contents of the `.data` section, if one was found.
    pub fn data_section_bytes(&self, mem: &Memory<'_>) -> Result<Option<Vec<u8>>, VmiError> {
        match self.data_section {
            Some((rva, size)) if size > 0 => {
                let pa = self.image_base_pa + rva as u64;
                Ok(Some(read_physical_range(mem, pa, size as usize)?))
            }
            _ => Ok(None),
        }
    }
}

/// Parses the DOS header, NT headers, and section table out of a single
/// header page, generic over PE32 (`ImageNtHeaders32`) vs PE32+
/// (`ImageNtHeaders64`). Returns the export data directory's RVA/size and
/// the section table on success.
fn parse_headers<Pe>(data: &[u8]) -> Option<(u32, u32, &[ImageSectionHeader])>
where
    Pe: ImageNtHeaders,
{
    let dos_header = data.read_at::<ImageDosHeader>(0).ok()?;
    if dos_header.e_magic.get(LE) != IMAGE_DOS_SIGNATURE {
        return None;
    }

    let mut offset = dos_header.nt_headers_offset() as u64;
    let nt_headers = data.read::<Pe>(&mut offset).ok()?;
    if nt_headers.signature() != IMAGE_NT_SIGNATURE || !nt_headers.is_valid_optional_magic() {
        return None;
    }

    // Skip past the rest of the optional header (beyond the fixed portion
    // already consumed by `Pe`) to land on the data directories, then the
    // section table right after them.
    let optional_data_size = u64::from(nt_headers.file_header().size_of_optional_header.get(LE))
        .checked_sub(std::mem::size_of::<Pe::ImageOptionalHeader>() as u64)?;
    let optional_data = data.read_bytes(&mut offset, optional_data_size).ok()?;

    let num_rva = nt_headers.optional_header().number_of_rva_and_sizes() as usize;
    let data_directories: &[ImageDataDirectory] = optional_data.read_slice_at(0, num_rva).ok()?;
    let export_dir = data_directories.get(IMAGE_DIRECTORY_ENTRY_EXPORT)?;

    let num_sections = nt_headers.file_header().number_of_sections.get(LE) as usize;
    let sections: &[ImageSectionHeader] = data.read_slice_at(offset, num_sections).ok()?;

    Some((export_dir.virtual_address.get(LE), export_dir.size.get(LE), sections))
}

fn read_export_name_rva(
    mem: &Memory<'_>,
    image_base_pa: Pa,
    export_rva: u32,
) -> Result<u32, VmiError> {
    let dir_pa = image_base_pa + export_rva as u64;
    let bytes = read_physical_range(mem, dir_pa, std::mem::size_of::<ImageExportDirectory>())?;
    let directory = bytes
        .as_slice()
        .read_at::<ImageExportDirectory>(0)
        .map_err(|_| VmiError::NotSupported("pe: malformed export directory"))?;
    Ok(directory.name.get(LE))
}

/// Reads `len` bytes starting at `pa`, stitching together as many 4 KiB
/// pages as needed.
fn read_physical_range(mem: &Memory<'_>, pa: Pa, len: usize) -> Result<Vec<u8>, VmiError> {
    let mut out = Vec::with_capacity(len);
    let mut cursor = pa;
    while out.len() < len {
        let page = mem.read_page(cursor.page_base(12))?;
        let offset = cursor.page_offset(12) as usize;
        let take = (len - out.len()).min(4096 - offset);
        out.extend_from_slice(&page[offset..offset + take]);
        cursor = cursor + take as u64;
    }
    Ok(out)
}
