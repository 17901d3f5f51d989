use crate::commitlog::Entry;
use std::io;

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TestEntry(Vec<u8>);

impl Entry for TestEntry {}

impl From<TestEntry> for Vec<u8> {
    fn from(entry: TestEntry) -> Self {
        entry.0
    }
}

impl TryFrom<Vec<u8>> for TestEntry {
    type Error = io::Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Ok(TestEntry(bytes))
    }
}

pub(crate) fn entry(b: u8) -> TestEntry {
    TestEntry(vec![b])
}
