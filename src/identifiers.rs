/// Pick the Henry Draper identifier from an object's list of catalog ids.
///
/// The object-id service returns every designation of an object; the
/// reference library is keyed on the HD number. When several entries
/// mention "HD" the last one is taken.
pub fn select_hd_identifier<S: AsRef<str>>(ids: &[S]) -> Option<String> {
    ids.iter()
        .map(AsRef::as_ref)
        .filter(|id| id.contains("HD"))
        .last()
        .map(|id| id.trim().to_string())
}
