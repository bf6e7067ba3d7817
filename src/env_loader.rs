use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(dumper_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    let base = dumper_home.or(home_dir)?;
    Some(base.join("jira-dumper/.env"))
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("JIRA_DUMPER_HOME").map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::fallback_dotenv_path;
    use std::path::PathBuf;

    #[test]
    fn fallback_prefers_dumper_home() {
        let got = fallback_dotenv_path(
            Some(PathBuf::from("/srv/archive")),
            Some(PathBuf::from("/home/face")),
        );

        let want = Some(PathBuf::from("/srv/archive/jira-dumper/.env"));
        assert_eq!(got, want);
    }

    #[test]
    fn fallback_uses_home_when_dumper_home_unset() {
        let got = fallback_dotenv_path(None, Some(PathBuf::from("/home/face")));
        let want = Some(PathBuf::from("/home/face/jira-dumper/.env"));
        assert_eq!(got, want);
    }

    #[test]
    fn fallback_is_none_without_any_base() {
        assert_eq!(fallback_dotenv_path(None, None), None);
    }
}
