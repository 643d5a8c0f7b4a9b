//! Static x86-64 Linux ELF images
//!
//! The image has one `PT_LOAD` segment mapped at [`BASE`]:
//!
//! ```text
//! 0x000  ELF header (64 bytes)
//! 0x040  program header (56 bytes)
//! 0x080  code: write(1, data, len); exit(0)
//! 0x100  data
//! ```

/// Virtual address the file is mapped at
pub const BASE: u64 = 0x40_0000;
/// File offset of the entry point
pub const CODE_OFFSET: u64 = 0x80;
/// File offset of the replayed bytes
pub const DATA_OFFSET: u64 = 0x100;

const EHDR_SIZE: u16 = 64;
const PHDR_SIZE: u16 = 56;
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 0x3e;
const PT_LOAD: u32 = 1;
const PF_R_X: u32 = 0b101;
const PAGE: u64 = 0x1000;

const SYS_WRITE: u32 = 1;
const SYS_EXIT: u32 = 60;

/// Machine code printing `len` bytes at `data` to stdout, then exiting 0
fn replay_code(data: u64, len: u64) -> Vec<u8> {
    let mut code = Vec::with_capacity(48);
    // mov eax, SYS_WRITE
    code.push(0xb8);
    code.extend_from_slice(&SYS_WRITE.to_le_bytes());
    // mov edi, 1
    code.push(0xbf);
    code.extend_from_slice(&1u32.to_le_bytes());
    // movabs rsi, data
    code.extend_from_slice(&[0x48, 0xbe]);
    code.extend_from_slice(&data.to_le_bytes());
    // movabs rdx, len
    code.extend_from_slice(&[0x48, 0xba]);
    code.extend_from_slice(&len.to_le_bytes());
    // syscall
    code.extend_from_slice(&[0x0f, 0x05]);
    // mov eax, SYS_EXIT
    code.push(0xb8);
    code.extend_from_slice(&SYS_EXIT.to_le_bytes());
    // xor edi, edi
    code.extend_from_slice(&[0x31, 0xff]);
    // syscall
    code.extend_from_slice(&[0x0f, 0x05]);
    code
}

/// Build the image bytes that print `output` when executed
#[must_use]
pub fn image(output: &[u8]) -> Vec<u8> {
    let len = output.len() as u64;
    let file_size = DATA_OFFSET + len;
    let mut out = Vec::with_capacity(file_size as usize);

    // e_ident: magic, 64-bit, little endian, version 1, System V ABI
    out.extend_from_slice(b"\x7fELF");
    out.extend_from_slice(&[2, 1, 1, 0]);
    out.resize(16, 0);
    out.extend_from_slice(&ET_EXEC.to_le_bytes());
    out.extend_from_slice(&EM_X86_64.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(BASE + CODE_OFFSET).to_le_bytes());
    out.extend_from_slice(&u64::from(EHDR_SIZE).to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&EHDR_SIZE.to_le_bytes());
    out.extend_from_slice(&PHDR_SIZE.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&[0; 6]); // no section headers
    debug_assert_eq!(out.len(), usize::from(EHDR_SIZE));

    out.extend_from_slice(&PT_LOAD.to_le_bytes());
    out.extend_from_slice(&PF_R_X.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes()); // p_offset
    out.extend_from_slice(&BASE.to_le_bytes()); // p_vaddr
    out.extend_from_slice(&BASE.to_le_bytes()); // p_paddr
    out.extend_from_slice(&file_size.to_le_bytes()); // p_filesz
    out.extend_from_slice(&file_size.to_le_bytes()); // p_memsz
    out.extend_from_slice(&PAGE.to_le_bytes());

    out.resize(CODE_OFFSET as usize, 0);
    out.extend_from_slice(&replay_code(BASE + DATA_OFFSET, len));
    out.resize(DATA_OFFSET as usize, 0);
    out.extend_from_slice(output);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(bytes: &[u8], at: usize) -> u16 {
        u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap())
    }

    fn u64_at(bytes: &[u8], at: usize) -> u64 {
        u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
    }

    #[test]
    fn header_describes_an_x86_64_executable() {
        let bytes = image(b"hello\n");
        assert_eq!(&bytes[..4], b"\x7fELF");
        assert_eq!(bytes[4], 2, "64-bit");
        assert_eq!(u16_at(&bytes, 16), ET_EXEC);
        assert_eq!(u16_at(&bytes, 18), 0x3e);
        assert_eq!(u64_at(&bytes, 24), 0x40_0080, "entry");
        assert_eq!(u64_at(&bytes, 32), 64, "program headers follow the header");
        assert_eq!(u16_at(&bytes, 56), 1, "one segment");
    }

    #[test]
    fn segment_covers_the_whole_file() {
        let bytes = image(b"hello\n");
        assert_eq!(bytes.len(), 0x106);
        let ph = 64;
        assert_eq!(u64_at(&bytes, ph + 16), BASE);
        assert_eq!(u64_at(&bytes, ph + 32), 0x106);
        assert_eq!(u64_at(&bytes, ph + 40), 0x106);
        assert_eq!(&bytes[0x100..], b"hello\n");
    }

    #[test]
    fn code_writes_the_data_then_exits() {
        let code = replay_code(0x40_0100, 6);
        assert!(code.len() <= (DATA_OFFSET - CODE_OFFSET) as usize);
        let syscalls = code.windows(2).filter(|w| *w == [0x0f, 0x05]).count();
        assert_eq!(syscalls, 2);
        let rsi = code.windows(2).position(|w| w == [0x48, 0xbe]).unwrap();
        assert_eq!(u64_at(&code, rsi + 2), 0x40_0100);
        let rdx = code.windows(2).position(|w| w == [0x48, 0xba]).unwrap();
        assert_eq!(u64_at(&code, rdx + 2), 6);
    }

    #[test]
    fn empty_output_still_makes_an_image() {
        let bytes = image(b"");
        assert_eq!(bytes.len(), DATA_OFFSET as usize);
    }
}
