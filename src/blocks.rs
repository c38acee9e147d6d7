//! Fixed CADINP blocks written into the model before iterating.

/// Header of the load-definition module that gets replaced
pub const LOAD_MODULE_MARKER: &str = "PROG SOFILOAD";

/// Header of the linear analysis module appended by [`ANALYSIS_BLOCK`]
pub const ANALYSIS_MARKER: &str = "+PROG ASE";

/// Inline parameter holding the vertical load magnitude
pub const VERTICAL_LOAD_MARKER: &str = "NODE NO 1002 TYPE PG P1";

/// Inline parameter holding the horizontal load magnitude
pub const HORIZONTAL_LOAD_MARKER: &str = "NODE NO 1002 TYPE PX P1";

/// Two load-case definitions: a permanent action 'G' carrying dead load and a
/// variable action 'Q' split into the vertical (LC 2) and horizontal (LC 3)
/// point loads on node 1002.
pub const LOAD_BLOCK: &str = "\
PROG SOFILOAD urs:3
HEAD EXPORT FROM DATABASE
UNIT TYPE 5
ACT  'G' GAMU 1.350000 1 PSI0 1 1 1 PART 'G' SUP PERM TITL \"dead load\"
ACT  'Q' GAMU 1.500000 0 PSI0 0.700000 0.500000 0.300000 PART 'Q' SUP COND TITL \"variable load\"
END
$ Exported by SOFILOAD     Version  17.20-70
PROG SOFILOAD urs:4
HEAD EXPORT FROM DATABASE
UNIT TYPE 5
GRP  1 VAL 'FULL' CS 9998
LC   1 'G' 1 DLX 0 -1 0 TITL \"Loadcase 1\"
GRP  1 VAL 'FULL' CS 9998
LC   2 'Q' 1 TITL \"V\"
NODE NO 1002 TYPE PG P1 0
GRP  1 VAL 'FULL' CS 9998
LC   3 'Q' 1 TITL \"H\"
NODE NO 1002 TYPE PX P1 0
END
";

/// Linear analysis of all load cases followed by the graphical report
pub const ANALYSIS_BLOCK: &str = "\
+PROG ASE urs:9 $ Linear Analysis
HEAD Calculation of forces and moments
PAGE UNII 0
CTRL OPT WARP VAL 0
LC ALL
END
+PROG WING urs:9.1 $ Graphical Output
HEAD Graphical Output
PAGE UNII 0
CTRL EMPT YES         $ create empty pages if results not available
CTRL WARN (800 802 1) $ no warnings if no values found
CTRL WARN (804 808 1) $ no warnings if no values found
CTRL WARN 873         $ no warning for 2D visibility
#define SCHR=0.2
SCHH H6 0.2
#define FILL=-
#define FILLI=-
#define FILLC=-
#define SCHRI=-
#define SCHRC=-
SIZ2 SPLI PICT
SIZE -URS SC 0 SPLI  2x1 MARG NO FORM STAN
VIEW EG3
LC 1 DESI 1
LOAD TYPE ALL
LC 2 DESI 2
LOAD TYPE ALL
LC 3 DESI 3
LOAD TYPE ALL
LC 1 DESI 1
NODE TYPE SV SCHH YES
LC 2 DESI 2
NODE TYPE SV SCHH YES
LC 3 DESI 3
NODE TYPE SV SCHH YES
LC 1 DESI 1
DEFO TYPE FULL FAC DEFA LC CURR; STRU NUME 0 0; DEFO NO
LC 2 DESI 2
DEFO TYPE FULL FAC DEFA LC CURR; STRU NUME 0 0; DEFO NO
LC 3 DESI 3
DEFO TYPE FULL FAC DEFA LC CURR; STRU NUME 0 0; DEFO NO
LC 1 DESI 1
BEAM TYPE MY
LC 2 DESI 2
BEAM TYPE MY
LC 3 DESI 3
BEAM TYPE MY
LC 1 DESI 1
BEAM TYPE MZ
LC 2 DESI 2
BEAM TYPE MZ
LC 3 DESI 3
BEAM TYPE MZ
LC 1 DESI 1
BEAM TYPE MT
LC 2 DESI 2
BEAM TYPE MT
LC 3 DESI 3
BEAM TYPE MT
LC 1 DESI 1
BEAM TYPE VZ
LC 2 DESI 2
BEAM TYPE VZ
LC 3 DESI 3
BEAM TYPE VZ
LC 1 DESI 1
BEAM TYPE VY
LC 2 DESI 2
BEAM TYPE VY
LC 3 DESI 3
BEAM TYPE VY
LC 1 DESI 1
BEAM TYPE  N
LC 2 DESI 2
BEAM TYPE  N
LC 3 DESI 3
BEAM TYPE  N
END
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_block_carries_both_load_markers() {
        assert!(LOAD_BLOCK.lines().any(|l| l.starts_with(VERTICAL_LOAD_MARKER)));
        assert!(LOAD_BLOCK.lines().any(|l| l.starts_with(HORIZONTAL_LOAD_MARKER)));
        assert!(LOAD_BLOCK.starts_with(LOAD_MODULE_MARKER));
    }

    #[test]
    fn analysis_block_starts_with_its_marker() {
        assert!(ANALYSIS_BLOCK.starts_with(ANALYSIS_MARKER));
        assert!(!ANALYSIS_BLOCK.contains(LOAD_MODULE_MARKER));
    }
}
