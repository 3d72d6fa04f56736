//! TRS-DOS `/CMD` writer (spec.md §4.13), grounded on `output_cmd.c`:
//! sections sorted by origin (`orgcmp`), one load block per
//! non-empty/non-BSS section, then a single transfer block built from
//! `-exec=SYM` or the first section's origin.

use crate::core::section::SectionTable;
use crate::error::CmdError;

/// Resolves the execution address: `-exec=SYM` if given (must resolve
/// in the symbol table), else the origin of the first non-skipped
/// section (spec.md §4.13, §9 "differs from the period-correct TRS-DOS
/// convention of 'last load address'" — this crate matches the
/// original, not the period convention).
pub fn resolve_exec_address(
    exec_symbol: Option<&str>,
    lookup_symbol: &dyn Fn(&str) -> Option<i64>,
    first_section_origin: Option<u32>,
) -> Result<u32, CmdError> {
    if let Some(name) = exec_symbol {
        return lookup_symbol(name)
            .map(|v| v as u32)
            .ok_or_else(|| CmdError::UndefinedExecSymbol(name.to_string()));
    }
    Ok(first_section_origin.unwrap_or(0))
}

/// Checks for overlap using the shared section-overlap check
/// (spec.md §4.13: "overlap is fatal").
pub fn check_overlap(sections: &SectionTable) -> Result<(), CmdError> {
    if let Some((a, b)) = crate::core::section::find_overlap(sections) {
        let sa = sections.get(a).name.clone();
        let sb = sections.get(b).name.clone();
        return Err(CmdError::SectionOverlap(sa, sb));
    }
    Ok(())
}

/// Builds the raw `/CMD` byte stream: one load block per non-empty,
/// non-BSS section (sorted by origin), then a transfer block.
pub fn write_cmd(sections: &SectionTable, exec_addr: u32) -> Vec<u8> {
    let mut ordered: Vec<_> = sections
        .iter_in_order()
        .map(|id| sections.get(id))
        .filter(|s| !s.attrs.uninitialized && !s.is_empty_of_content())
        .collect();
    ordered.sort_by_key(|s| s.org);

    let mut out = Vec::new();
    for sec in ordered {
        let data: Vec<u8> = sec
            .atoms
            .iter()
            .filter_map(|a| match &a.kind {
                crate::core::atom::AtomKind::Data(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        if data.is_empty() {
            continue;
        }
        let length = (data.len() + 5) as u16;
        out.push(0x01);
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&(sec.org as u16).to_le_bytes());
        out.extend_from_slice(&data);
    }
    out.push(0x02);
    out.extend_from_slice(&0x0002u16.to_le_bytes());
    out.extend_from_slice(&(exec_addr as u16).to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::atom::{Atom, AtomKind};
    use crate::core::section::SectionAttrs;

    fn make_section(table: &mut SectionTable, name: &str, org: u32, data: Vec<u8>) {
        let id = table.new_section(name, SectionAttrs::default(), org);
        if !data.is_empty() {
            table.get_mut(id).append(Atom::new(AtomKind::Data(data), 1, "a.s", 1));
        }
    }

    #[test]
    fn scenario_s5_ordering_and_transfer() {
        let mut sections = SectionTable::new();
        make_section(&mut sections, "high", 0x8000, vec![0u8; 16]);
        make_section(&mut sections, "low", 0x4000, vec![0u8; 32]);
        let exec = resolve_exec_address(Some("START"), &|n| if n == "START" { Some(0x4010) } else { None }, None).unwrap();
        assert_eq!(exec, 0x4010);

        let bytes = write_cmd(&sections, exec);
        // First load block: "low" at 0x4000, 32 bytes -> header 0x01 | len=37 | addr=0x4000
        assert_eq!(bytes[0], 0x01);
        assert_eq!(u16::from_le_bytes([bytes[1], bytes[2]]), 37);
        assert_eq!(u16::from_le_bytes([bytes[3], bytes[4]]), 0x4000);
        let second_block_start = 5 + 32;
        assert_eq!(bytes[second_block_start], 0x01);
        assert_eq!(
            u16::from_le_bytes([bytes[second_block_start + 3], bytes[second_block_start + 4]]),
            0x8000
        );
        let transfer_start = second_block_start + 5 + 16;
        assert_eq!(bytes[transfer_start], 0x02);
        assert_eq!(
            u16::from_le_bytes([bytes[transfer_start + 1], bytes[transfer_start + 2]]),
            0x0002
        );
        assert_eq!(
            u16::from_le_bytes([bytes[transfer_start + 3], bytes[transfer_start + 4]]),
            0x4010
        );
    }

    #[test]
    fn empty_sections_are_skipped() {
        let mut sections = SectionTable::new();
        make_section(&mut sections, "empty", 0x1000, vec![]);
        make_section(&mut sections, "full", 0x2000, vec![1, 2, 3]);
        let bytes = write_cmd(&sections, 0x2000);
        // Only one load block + transfer block.
        assert_eq!(bytes[0], 0x01);
        let transfer_start = 5 + 3;
        assert_eq!(bytes[transfer_start], 0x02);
    }

    #[test]
    fn undefined_exec_symbol_errors() {
        let r = resolve_exec_address(Some("NOPE"), &|_| None, Some(0x1000));
        assert!(matches!(r, Err(CmdError::UndefinedExecSymbol(_))));
    }

    #[test]
    fn default_exec_is_first_section_origin() {
        let r = resolve_exec_address(None, &|_| None, Some(0x4000)).unwrap();
        assert_eq!(r, 0x4000);
    }

    #[test]
    fn overlap_detected_is_fatal() {
        let mut sections = SectionTable::new();
        make_section(&mut sections, "a", 0x1000, vec![0u8; 0x20]);
        make_section(&mut sections, "b", 0x1010, vec![0u8; 4]);
        assert!(matches!(check_overlap(&sections), Err(CmdError::SectionOverlap(_, _))));
    }
}
