use std::io::Cursor;

use forth16::{
    block::{BlockError, BLOCK_SIZE},
    memory::NAME_BASE,
    Diagnostic, Forth, Halt, Params, PRELUDE,
};

type TestForth = Forth<Cursor<Vec<u8>>, Vec<u8>>;

fn forth_in(dir: &std::path::Path) -> TestForth {
    let params = Params::new().with_block_dir(dir);
    let mut forth = Forth::new(Cursor::new(PRELUDE.as_bytes().to_vec()), Vec::new(), params)
        .unwrap();
    assert_eq!(forth.run(), Ok(Halt::EndOfInput));
    forth
}

fn eval(forth: &mut TestForth, src: &str) -> String {
    forth.output_mut().clear();
    forth.set_input(Cursor::new(src.as_bytes().to_vec()));
    assert_eq!(forth.run(), Ok(Halt::EndOfInput));
    String::from_utf8(forth.output().clone()).unwrap()
}

#[test]
fn save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut forth = forth_in(dir.path());

    // fill cells 5000..5004 and save the 1024 bytes starting at cell 5000
    assert_eq!(
        eval(&mut forth, "11 5000 ! 22 5001 ! 10000 7 save ."),
        "0"
    );
    let file = dir.path().join("0007.blk");
    let bytes = std::fs::read(&file).unwrap();
    assert_eq!(bytes.len(), BLOCK_SIZE);
    assert_eq!(&bytes[..4], &[11, 0, 22, 0]);

    // load the block somewhere else and read it back
    assert_eq!(eval(&mut forth, "12000 7 load . 6000 @ . 6001 @ ."), "01122");
    assert!(forth.take_diagnostics().is_empty());
}

#[test]
fn round_trip_restores_region() {
    let dir = tempfile::tempdir().unwrap();
    let mut forth = forth_in(dir.path());

    assert_eq!(eval(&mut forth, "0 7 save . 0 7 load ."), "00");
    let saved = std::fs::read(dir.path().join("0007.blk")).unwrap();
    // everything but the return stack pointer is as it was when saved
    assert_eq!(saved[4..], forth.memory().as_bytes()[4..BLOCK_SIZE]);
}

#[test]
fn missing_block() {
    let dir = tempfile::tempdir().unwrap();
    let mut forth = forth_in(dir.path());

    assert_eq!(eval(&mut forth, "0 0x42 load ."), "65535");
    let diags = forth.take_diagnostics();
    assert!(matches!(
        diags.as_slice(),
        [Diagnostic::Block(BlockError::Io { id: 0x42, .. })]
    ));
    assert!(forth.is_valid());
}

#[test]
fn offset_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let mut forth = forth_in(dir.path());

    assert_eq!(eval(&mut forth, "32000 1 save ."), "65535");
    assert_eq!(
        forth.take_diagnostics(),
        [Diagnostic::Block(BlockError::OffsetOutOfRange(32000))]
    );
    assert!(!dir.path().join("0001.blk").exists());

    assert_eq!(eval(&mut forth, "15360 1 save ."), "65535");
    assert_eq!(
        forth.take_diagnostics(),
        [Diagnostic::Block(BlockError::OffsetOutOfRange(15360))]
    );
    assert!(!dir.path().join("0001.blk").exists());

    assert_eq!(eval(&mut forth, "15359 1 save ."), "0");
    assert!(dir.path().join("0001.blk").exists());
}

#[test]
fn load_cannot_reach_names() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("0001.blk"), [0xFFu8; BLOCK_SIZE]).unwrap();
    let mut forth = forth_in(dir.path());
    let names = forth.memory().as_bytes()[NAME_BASE..NAME_BASE + BLOCK_SIZE].to_vec();

    // 16384 is the first byte of the name table
    assert_eq!(eval(&mut forth, "16384 1 load ."), "65535");
    assert_eq!(
        forth.take_diagnostics(),
        [Diagnostic::Block(BlockError::OffsetOutOfRange(16384))]
    );
    assert_eq!(
        &forth.memory().as_bytes()[NAME_BASE..NAME_BASE + BLOCK_SIZE],
        &names[..]
    );
    assert!(forth.find("dup").unwrap().is_some());
    assert_eq!(eval(&mut forth, "2 dup * ."), "4");
}

#[test]
fn block_carries_registers() {
    let dir = tempfile::tempdir().unwrap();
    let mut forth = forth_in(dir.path());

    eval(&mut forth, ": greet 72 emit 105 emit ;");
    let here = forth.here().unwrap();
    assert!(usize::from(here) * 2 < BLOCK_SIZE);
    assert_eq!(eval(&mut forth, "0 1 save ."), "0");

    // the first block of the image holds `here`, so loading it into another
    // machine moves that machine's dictionary pointer too
    let mut other = forth_in(dir.path());
    assert_ne!(other.here().unwrap(), here);
    assert_eq!(eval(&mut other, "0 1 load ."), "0");
    assert_eq!(other.here().unwrap(), here);
    assert_eq!(
        &other.memory().as_bytes()[..BLOCK_SIZE],
        &forth.memory().as_bytes()[..BLOCK_SIZE]
    );
}
