//! *SoC* identification.

/// Known *SoCs*, by the ID reported in the FEL version response.
const SOC_NAMES: [(u32, &str); 13] = [(0x1623, "A10"),
                                      (0x1625, "A10s/A13/R8"),
                                      (0x1651, "A20"),
                                      (0x1650, "A23"),
                                      (0x1633, "A31"),
                                      (0x1667, "A33/R16"),
                                      (0x1689, "A64"),
                                      (0x1639, "A80"),
                                      (0x1673, "A83T"),
                                      (0x1680, "H3/H2+"),
                                      (0x1718, "H5"),
                                      (0x1701, "R40"),
                                      (0x1681, "V3s")];

/// Gets the *SoC* name from the given ID, if known.
pub fn soc_name(soc_id: u32) -> Option<&'static str> {
    SOC_NAMES.iter()
        .find(|&&(id, _)| id == soc_id)
        .map(|&(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ids() {
        assert_eq!(soc_name(0x1623), Some("A10"));
        assert_eq!(soc_name(0x1689), Some("A64"));
        assert_eq!(soc_name(0x1680), Some("H3/H2+"));
    }

    #[test]
    fn unknown_id() {
        assert_eq!(soc_name(0x0016_2300), None);
        assert_eq!(soc_name(0), None);
    }
}
