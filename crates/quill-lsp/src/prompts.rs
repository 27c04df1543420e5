// ABOUTME: Prompt templates for chat-style backends and code-transform actions

/// System prompt for chat-backed inline completion.
pub fn completion_system(language_id: &str) -> String {
    format!(
        "You are a {language_id} code completion assistant. Complete the code at the cursor position.\n\
         \n\
         Rules:\n\
         - Output ONLY the code that should be inserted at the cursor position\n\
         - Do NOT include any code that already exists before or after the cursor\n\
         - Do NOT add explanations, comments, or markdown formatting\n\
         - If the code after the cursor contains closing delimiters, do NOT add them again\n\
         - Generate syntactically correct {language_id} code that fits between the before and after content"
    )
}

pub fn completion_user(path: &str, content_before: &str, content_after: &str) -> String {
    format!(
        "File: {path}\n\
         \n\
         Code before cursor:\n\
         {content_before}\n\
         \n\
         <CURSOR>\n\
         \n\
         Code after cursor (do not duplicate or close delimiters that already exist here):\n\
         {content_after}\n\
         \n\
         Complete the code at the <CURSOR> position."
    )
}

/// System prompt for the fix-and-complete code action.
pub fn fix_complete_system(language_id: &str) -> String {
    format!(
        "You are a {language_id} code assistant. Fix errors and complete unfinished code.\n\
         \n\
         Rules:\n\
         - Output ONLY the replacement code, no markdown, no explanations, no code fences\n\
         - Complete any obviously unfinished code (missing bodies, incomplete expressions)\n\
         - The output MUST be syntactically complete and valid\n\
         - Do NOT add comments\n\
         - Do NOT refactor beyond what is needed to fix or complete"
    )
}

pub fn fix_complete_user(content: &str) -> String {
    format!("Code:\n{content}")
}

/// System prompt for the explain-with-comments code action.
pub fn explain_comments_system(language_id: &str) -> String {
    format!(
        "You annotate {language_id} code by inserting comment lines. You NEVER change code.\n\
         \n\
         Rules:\n\
         - Return the EXACT original lines of code, character for character\n\
         - You may ONLY insert new comment-only lines between existing lines\n\
         - NEVER modify, complete, fix, rewrite, or delete any original line\n\
         - No markdown, no code fences, raw code only\n\
         - Use {language_id} comment style"
    )
}

pub fn explain_comments_user(content: &str) -> String {
    format!(
        "Insert comment lines to explain the code below.\n\
         Every original line must appear exactly as-is.\n\
         \n\
         {content}"
    )
}

/// System prompt for the code-from-comment action.
pub fn code_from_comment_system(language_id: &str) -> String {
    format!(
        "You are a {language_id} code generation assistant. Generate code from the comment \
         description in the selection.\n\
         \n\
         Rules:\n\
         - Output ONLY the generated code, no markdown, no explanations, no code fences\n\
         - Replace the comment with the implementation it describes\n\
         - Preserve the original indentation style and level\n\
         - Keep any non-comment code in the selection unchanged"
    )
}

pub fn code_from_comment_user(content: &str) -> String {
    format!("Generate code from the comment description:\n{content}")
}
